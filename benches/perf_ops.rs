use std::fs;
use std::path::PathBuf;

use airgap_fs::ops::{
    Context, ListDirRequest, ReadFileRequest, SearchTextRequest, list_dir, read_file, search_text,
};
use airgap_fs::{AirGapConfig, SearchBackendPreference};
use criterion::{Criterion, criterion_group, criterion_main};

fn bench_config(root: PathBuf) -> AirGapConfig {
    AirGapConfig {
        search_backend: SearchBackendPreference::Builtin,
        session_id: Some("bench".to_string()),
        max_results: 1_000,
        ..AirGapConfig::with_roots([root])
    }
}

struct BenchFixture {
    _tempdir: tempfile::TempDir,
    ctx: Context,
    ctx_audited: Context,
    large_path: PathBuf,
    blocked_path: PathBuf,
    read_req: ReadFileRequest,
    list_req: ListDirRequest,
    search_req: SearchTextRequest,
}

fn setup_fixture() -> BenchFixture {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let root = tempdir.path().join("root");
    fs::create_dir(&root).expect("mkdir root");

    let large_path = root.join("large.txt");
    let mut large = String::with_capacity(256 * 1024);
    for i in 0..8_000 {
        let line = format!("line-{i} normal text and maybe needle-{i}\n");
        large.push_str(&line);
    }
    fs::write(&large_path, large).expect("write large file");

    let docs_dir = root.join("docs");
    fs::create_dir_all(&docs_dir).expect("mkdir docs");
    for i in 0..600 {
        let text = if i % 8 == 0 {
            "needle appears on some files\n"
        } else {
            "plain content\n"
        };
        fs::write(docs_dir.join(format!("file-{i}.txt")), text).expect("write txt");
    }
    for i in 0..50 {
        fs::write(docs_dir.join(format!("creds-{i}.pem")), "needle\n").expect("write pem");
    }
    let blocked_path = docs_dir.join("creds-0.pem");

    let ctx = Context::new(bench_config(root.clone())).expect("ctx");
    let ctx_audited = Context::new(AirGapConfig {
        audit_log_path: Some(tempdir.path().join("audit.jsonl")),
        ..bench_config(root.clone())
    })
    .expect("ctx audited");

    BenchFixture {
        _tempdir: tempdir,
        ctx,
        ctx_audited,
        read_req: ReadFileRequest::new(&large_path),
        list_req: ListDirRequest {
            path: docs_dir.clone(),
            max_results: Some(128),
        },
        search_req: SearchTextRequest::new(&docs_dir, "needle"),
        large_path,
        blocked_path,
    }
}

fn bench_ops(c: &mut Criterion) {
    let fixture = setup_fixture();

    c.bench_function("validate/allowed_file", |b| {
        b.iter(|| fixture.ctx.validate_path(&fixture.large_path));
    });
    c.bench_function("validate/blocked_file", |b| {
        b.iter(|| fixture.ctx.validate_path(&fixture.blocked_path));
    });

    c.bench_function("read/full_large_file", |b| {
        b.iter(|| {
            let req = fixture.read_req.clone();
            read_file(&fixture.ctx, req).expect("read");
        });
    });
    c.bench_function("read/full_large_file_with_audit_log", |b| {
        b.iter(|| {
            let req = fixture.read_req.clone();
            read_file(&fixture.ctx_audited, req).expect("read");
        });
    });

    c.bench_function("list_dir/top_k_entries", |b| {
        b.iter(|| {
            let req = fixture.list_req.clone();
            list_dir(&fixture.ctx, req).expect("list_dir");
        });
    });

    c.bench_function("search/builtin_plain_query", |b| {
        b.iter(|| {
            let req = fixture.search_req.clone();
            search_text(&fixture.ctx, req).expect("search");
        });
    });
}

criterion_group!(benches, bench_ops);
criterion_main!(benches);
