mod common;

use airgap_fs::{AirGapConfig, Context, DenialReason, ReadFileRequest, TextEncoding};
use common::{Sandbox, test_config, test_context};

#[test]
fn reads_a_whole_file() {
    let sandbox = Sandbox::new();
    let file = sandbox.write("hello.txt", "hello world");
    let ctx = test_context(&sandbox.root);

    let resp = ctx.read_file(ReadFileRequest::new(&file)).expect("read");
    assert_eq!(resp.content, "hello world");
    assert_eq!(resp.encoding, TextEncoding::Utf8);
    assert_eq!(resp.bytes_read, 11);
    assert_eq!(resp.file_size_bytes, 11);
    assert!(!resp.truncated);
    assert_eq!(
        resp.path,
        std::fs::canonicalize(&file).expect("canonicalize")
    );
}

#[test]
fn offset_and_limit_select_a_window() {
    let sandbox = Sandbox::new();
    let file = sandbox.write("hello.txt", "hello world");
    let ctx = test_context(&sandbox.root);

    let resp = ctx
        .read_file(ReadFileRequest {
            path: file,
            offset: 6,
            limit: Some(3),
        })
        .expect("read");
    assert_eq!(resp.content, "wor");
    assert_eq!(resp.bytes_read, 3);
    assert_eq!(resp.offset, 6);
    assert_eq!(resp.limit, 3);
    assert!(resp.truncated);
}

#[test]
fn offset_past_end_returns_empty_content() {
    let sandbox = Sandbox::new();
    let file = sandbox.write("short.txt", "abc");
    let ctx = test_context(&sandbox.root);

    let resp = ctx
        .read_file(ReadFileRequest {
            path: file,
            offset: 100,
            limit: None,
        })
        .expect("read");
    assert_eq!(resp.content, "");
    assert_eq!(resp.bytes_read, 0);
    assert!(!resp.truncated);
}

#[test]
fn window_is_clamped_to_max_response_bytes() {
    let sandbox = Sandbox::new();
    let file = sandbox.write("big.txt", "a".repeat(100));
    let ctx = Context::new(AirGapConfig {
        max_response_bytes: 10,
        ..test_config(&sandbox.root)
    })
    .expect("ctx");

    let resp = ctx
        .read_file(ReadFileRequest {
            path: file,
            offset: 0,
            limit: Some(50),
        })
        .expect("read");
    assert_eq!(resp.bytes_read, 10);
    assert_eq!(resp.limit, 10);
    assert!(resp.truncated);
}

#[test]
fn oversized_files_are_rejected_without_a_denial() {
    let sandbox = Sandbox::new();
    let file = sandbox.write("big.txt", "a".repeat(64));
    let ctx = Context::new(AirGapConfig {
        max_file_size_bytes: 16,
        ..test_config(&sandbox.root)
    })
    .expect("ctx");

    let err = ctx
        .read_file(ReadFileRequest::new(&file))
        .expect_err("too large");
    assert_eq!(err.code(), "file_too_large");
    assert_eq!(err.denial_reason(), None);
}

#[test]
fn non_utf8_content_is_decoded_as_latin1() {
    let sandbox = Sandbox::new();
    let file = sandbox.write("latin.txt", [b'c', b'a', b'f', 0xE9]);
    let ctx = test_context(&sandbox.root);

    let resp = ctx.read_file(ReadFileRequest::new(&file)).expect("read");
    assert_eq!(resp.encoding, TextEncoding::Latin1);
    assert_eq!(resp.content, "café");
    assert_eq!(resp.bytes_read, 4);
}

#[test]
fn blocked_files_are_denied() {
    let sandbox = Sandbox::new();
    let file = sandbox.write("config/.env.production", "TOKEN=abc");
    let ctx = test_context(&sandbox.root);

    let err = ctx
        .read_file(ReadFileRequest::new(&file))
        .expect_err("blocked");
    assert_eq!(err.code(), "denied");
    assert_eq!(err.denial_reason(), Some(DenialReason::BlockedPattern));
    assert!(!err.to_string().contains(".env"));
}

#[test]
fn outside_files_are_denied() {
    let sandbox = Sandbox::new();
    let file = sandbox.outside.join("x.txt");
    std::fs::write(&file, "x").expect("write");
    let ctx = test_context(&sandbox.root);

    let err = ctx
        .read_file(ReadFileRequest::new(&file))
        .expect_err("outside");
    assert_eq!(err.denial_reason(), Some(DenialReason::OutsideAllowedRoots));
}

#[test]
fn directories_are_not_files() {
    let sandbox = Sandbox::new();
    std::fs::create_dir(sandbox.root.join("sub")).expect("mkdir");
    let ctx = test_context(&sandbox.root);

    let err = ctx
        .read_file(ReadFileRequest::new(sandbox.root.join("sub")))
        .expect_err("dir");
    assert_eq!(err.code(), "not_a_file");
}

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::common::unix::{mkfifo, symlink};

    #[test]
    fn symlink_escape_is_denied() {
        let sandbox = Sandbox::new();
        std::fs::write(sandbox.outside.join("passwd"), "root:x:0:0").expect("write");
        symlink(
            &sandbox.outside.join("passwd"),
            &sandbox.root.join("passwd"),
        );
        let ctx = test_context(&sandbox.root);

        let err = ctx
            .read_file(ReadFileRequest::new(sandbox.root.join("passwd")))
            .expect_err("escape");
        assert_eq!(err.denial_reason(), Some(DenialReason::SymlinkEscape));
    }

    #[test]
    fn symlink_inside_a_root_reads_the_target() {
        let sandbox = Sandbox::new();
        let target = sandbox.write("real.txt", "content");
        symlink(&target, &sandbox.root.join("alias.txt"));
        let ctx = test_context(&sandbox.root);

        let resp = ctx
            .read_file(ReadFileRequest::new(sandbox.root.join("alias.txt")))
            .expect("read");
        assert_eq!(resp.content, "content");
        assert_eq!(
            resp.path,
            std::fs::canonicalize(&target).expect("canonicalize")
        );
    }

    #[test]
    fn fifos_are_rejected_without_blocking() {
        let sandbox = Sandbox::new();
        mkfifo(&sandbox.root.join("pipe"));
        let ctx = test_context(&sandbox.root);

        let err = ctx
            .read_file(ReadFileRequest::new(sandbox.root.join("pipe")))
            .expect_err("fifo");
        assert_eq!(err.code(), "not_a_file");
    }
}
