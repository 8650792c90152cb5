mod common;

use airgap_fs::{AirGapConfig, Context, DenialReason, EntryKind, ListDirRequest};
use common::{Sandbox, test_config, test_context};

fn request(path: &std::path::Path) -> ListDirRequest {
    ListDirRequest {
        path: path.to_path_buf(),
        max_results: None,
    }
}

#[test]
fn lists_entries_sorted_by_name_with_types_and_sizes() {
    let sandbox = Sandbox::new();
    sandbox.write("b.txt", "12345");
    sandbox.write("a.txt", "1");
    std::fs::create_dir(sandbox.root.join("c")).expect("mkdir");
    let ctx = test_context(&sandbox.root);

    let resp = ctx.list_dir(request(&sandbox.root)).expect("list");
    let names: Vec<&str> = resp.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "c"]);
    assert!(!resp.truncated);
    assert_eq!(
        resp.path,
        std::fs::canonicalize(&sandbox.root).expect("canonicalize")
    );

    assert_eq!(resp.entries[0].kind, EntryKind::File);
    assert_eq!(resp.entries[1].size, Some(5));
    assert!(resp.entries[1].accessible);
    assert_eq!(resp.entries[2].kind, EntryKind::Dir);
    assert_eq!(resp.entries[2].size, None);
    assert_eq!(resp.entries[2].path, resp.path.join("c"));
}

#[test]
fn listing_is_deterministic() {
    let sandbox = Sandbox::new();
    for name in ["z", "m", "a", "q"] {
        sandbox.write(&format!("{name}.txt"), name);
    }
    let ctx = test_context(&sandbox.root);
    let first = ctx.list_dir(request(&sandbox.root)).expect("list");
    let second = ctx.list_dir(request(&sandbox.root)).expect("list");
    assert_eq!(first.entries, second.entries);
}

#[test]
fn blocked_entries_are_named_but_not_described() {
    let sandbox = Sandbox::new();
    sandbox.write(".env", "SECRET=1");
    sandbox.write("server.key", "k");
    sandbox.write("notes.txt", "ok");
    let ctx = test_context(&sandbox.root);

    let resp = ctx.list_dir(request(&sandbox.root)).expect("list");
    let env = resp
        .entries
        .iter()
        .find(|e| e.name == ".env")
        .expect(".env listed");
    assert_eq!(env.kind, EntryKind::Unknown);
    assert!(!env.accessible);
    assert_eq!(env.size, None);
    assert_eq!(env.denial_reason, Some(DenialReason::BlockedPattern));

    let key = resp
        .entries
        .iter()
        .find(|e| e.name == "server.key")
        .expect("key listed");
    assert_eq!(key.denial_reason, Some(DenialReason::BlockedPattern));

    let notes = resp
        .entries
        .iter()
        .find(|e| e.name == "notes.txt")
        .expect("notes listed");
    assert!(notes.accessible);
    assert_eq!(notes.denial_reason, None);
}

#[test]
fn max_results_truncates_in_name_order() {
    let sandbox = Sandbox::new();
    for idx in 0..5 {
        sandbox.write(&format!("f{idx}.txt"), "x");
    }
    let ctx = test_context(&sandbox.root);

    let resp = ctx
        .list_dir(ListDirRequest {
            path: sandbox.root.clone(),
            max_results: Some(2),
        })
        .expect("list");
    assert!(resp.truncated);
    let names: Vec<&str> = resp.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["f0.txt", "f1.txt"]);
}

#[test]
fn request_cannot_raise_the_configured_limit() {
    let sandbox = Sandbox::new();
    for idx in 0..4 {
        sandbox.write(&format!("f{idx}.txt"), "x");
    }
    let ctx = Context::new(AirGapConfig {
        max_results: 3,
        ..test_config(&sandbox.root)
    })
    .expect("ctx");

    let resp = ctx
        .list_dir(ListDirRequest {
            path: sandbox.root.clone(),
            max_results: Some(1000),
        })
        .expect("list");
    assert_eq!(resp.entries.len(), 3);
    assert!(resp.truncated);
}

#[test]
fn a_file_is_not_a_directory() {
    let sandbox = Sandbox::new();
    let file = sandbox.write("a.txt", "x");
    let ctx = test_context(&sandbox.root);
    let err = ctx.list_dir(request(&file)).expect_err("not a dir");
    assert_eq!(err.code(), "not_a_directory");
}

#[test]
fn denied_directories_fail_with_a_reason() {
    let sandbox = Sandbox::new();
    let ctx = test_context(&sandbox.root);

    let err = ctx.list_dir(request(&sandbox.outside)).expect_err("denied");
    assert_eq!(err.code(), "denied");
    assert_eq!(err.denial_reason(), Some(DenialReason::OutsideAllowedRoots));

    let err = ctx
        .list_dir(request(&sandbox.root.join("missing")))
        .expect_err("missing");
    assert_eq!(err.denial_reason(), Some(DenialReason::NotFound));
}

#[test]
fn empty_directory_lists_nothing() {
    let sandbox = Sandbox::new();
    let ctx = test_context(&sandbox.root);
    let resp = ctx.list_dir(request(&sandbox.root)).expect("list");
    assert!(resp.entries.is_empty());
    assert!(!resp.truncated);
}

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::common::unix::{mkfifo, symlink};

    #[test]
    fn escaping_symlinks_are_listed_as_denied() {
        let sandbox = Sandbox::new();
        std::fs::write(sandbox.outside.join("secret.txt"), "x").expect("write");
        symlink(
            &sandbox.outside.join("secret.txt"),
            &sandbox.root.join("leak.txt"),
        );
        let ctx = test_context(&sandbox.root);

        let resp = ctx.list_dir(request(&sandbox.root)).expect("list");
        let leak = &resp.entries[0];
        assert_eq!(leak.name, "leak.txt");
        assert_eq!(leak.kind, EntryKind::Symlink);
        assert!(!leak.accessible);
        assert_eq!(leak.denial_reason, Some(DenialReason::SymlinkEscape));
        assert_eq!(leak.target_type, None);
    }

    #[test]
    fn inner_symlinks_report_their_target_type() {
        let sandbox = Sandbox::new();
        std::fs::create_dir(sandbox.root.join("real")).expect("mkdir");
        symlink(&sandbox.root.join("real"), &sandbox.root.join("alias"));
        let ctx = test_context(&sandbox.root);

        let resp = ctx.list_dir(request(&sandbox.root)).expect("list");
        let alias = resp
            .entries
            .iter()
            .find(|e| e.name == "alias")
            .expect("alias listed");
        assert_eq!(alias.kind, EntryKind::Symlink);
        assert!(alias.accessible);
        assert_eq!(alias.target_type, Some(EntryKind::Dir));
    }

    #[test]
    fn links_are_judged_by_their_target_not_their_name() {
        let sandbox = Sandbox::new();
        let notes = sandbox.write("notes.txt", "ok");
        let env = sandbox.write(".env", "SECRET=1");
        symlink(&notes, &sandbox.root.join("credentials"));
        symlink(&env, &sandbox.root.join("settings.txt"));
        let ctx = test_context(&sandbox.root);

        let resp = ctx.list_dir(request(&sandbox.root)).expect("list");
        let find = |name: &str| {
            resp.entries
                .iter()
                .find(|e| e.name == name)
                .expect("entry listed")
        };
        let credentials = find("credentials");
        assert_eq!(credentials.kind, EntryKind::Symlink);
        assert!(credentials.accessible);
        assert_eq!(credentials.target_type, Some(EntryKind::File));

        let settings = find("settings.txt");
        assert!(!settings.accessible);
        assert_eq!(settings.denial_reason, Some(DenialReason::BlockedPattern));
    }

    #[test]
    fn special_files_are_unknown() {
        let sandbox = Sandbox::new();
        mkfifo(&sandbox.root.join("pipe"));
        let ctx = test_context(&sandbox.root);

        let resp = ctx.list_dir(request(&sandbox.root)).expect("list");
        assert_eq!(resp.entries[0].kind, EntryKind::Unknown);
        assert!(!resp.entries[0].accessible);
    }

    #[test]
    fn listing_a_symlinked_directory_outside_is_denied() {
        let sandbox = Sandbox::new();
        symlink(&sandbox.outside, &sandbox.root.join("out"));
        let ctx = test_context(&sandbox.root);
        let err = ctx
            .list_dir(request(&sandbox.root.join("out")))
            .expect_err("escape");
        assert_eq!(err.denial_reason(), Some(DenialReason::SymlinkEscape));
    }
}
