//! End-to-end tests for the log engine on the local filesystem.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDateTime;
use tempfile::TempDir;
use tidelog::naming;
use tidelog::record::TIMESTAMP_FORMAT;
use tidelog::{
    AsyncLogFile, FileStorage, IoWorkerPool, LogConfig, LogEngine, LoggingLevel, Storage,
};

fn engine_in(dir: &TempDir, config: LogConfig) -> LogEngine {
    LogEngine::new(&config.with_dir(dir.path())).unwrap()
}

/// Parts of `stream` in part order.
fn parts(dir: &Path, stream: &str) -> Vec<PathBuf> {
    let mut found: Vec<(u32, PathBuf)> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?.to_owned();
            naming::parse_part(&name, stream).map(|n| (n, p))
        })
        .collect();
    found.sort();
    found.into_iter().map(|(_, p)| p).collect()
}

/// Records of `stream` across every part, without delimiters.
fn records(dir: &Path, stream: &str) -> Vec<String> {
    parts(dir, stream)
        .iter()
        .flat_map(|p| {
            let text = std::fs::read_to_string(p).unwrap();
            assert!(text.is_empty() || text.ends_with("\r\n"), "torn record in {p:?}");
            text.split_terminator("\r\n").map(str::to_owned).collect::<Vec<_>>()
        })
        .collect()
}

/// Splits a record into its timestamp and text.
fn split_record(record: &str) -> (NaiveDateTime, &str) {
    let (stamp, text) = record.split_once('\t').unwrap();
    (NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).unwrap(), text)
}

#[test]
fn test_hello_world() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_in(&temp_dir, LogConfig::default());

    assert!(engine.append("out", "hello").unwrap());
    assert!(engine.append("out", "world").unwrap());
    assert_eq!(
        engine.current_file_info("out"),
        Some(temp_dir.path().join("out.000.log"))
    );
    drop(engine);

    let lines = records(temp_dir.path(), "out");
    assert_eq!(lines.len(), 2);
    let (first, hello) = split_record(&lines[0]);
    let (second, world) = split_record(&lines[1]);
    assert_eq!(hello, "hello");
    assert_eq!(world, "world");
    assert!(first <= second);
}

#[test]
fn test_tiny_limit_puts_each_record_in_its_own_part() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_in(&temp_dir, LogConfig::default().with_log_size(3));

    engine.append("out", "hello").unwrap();
    engine.append("out", "world").unwrap();
    assert_eq!(
        engine.current_file_info("out"),
        Some(temp_dir.path().join("out.001.log"))
    );
    drop(engine);

    let files = parts(temp_dir.path(), "out");
    assert_eq!(files.len(), 2);
    let first = std::fs::read_to_string(&files[0]).unwrap();
    let second = std::fs::read_to_string(&files[1]).unwrap();
    assert!(first.ends_with("\thello\r\n"));
    assert!(second.ends_with("\tworld\r\n"));
}

#[test]
fn test_error_record_carries_cause() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_in(&temp_dir, LogConfig::default());

    let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
    assert!(engine.append_error("sync failed", Some(&cause)).unwrap());
    drop(engine);

    let lines = records(temp_dir.path(), "error");
    assert_eq!(lines.len(), 1);
    assert_eq!(split_record(&lines[0]).1, "sync failed disk on fire");
}

#[test]
fn test_errors_only_skips_info() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_in(&temp_dir, LogConfig::default().with_level(LoggingLevel::ErrorsOnly));

    assert!(!engine.append_info("ignored").unwrap());
    assert!(engine.append_error("kept", None).unwrap());
    drop(engine);

    assert!(parts(temp_dir.path(), "info").is_empty());
    assert_eq!(records(temp_dir.path(), "error").len(), 1);
}

#[test]
fn test_rotation_keeps_every_record_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_in(&temp_dir, LogConfig::default().with_log_size(256));

    for i in 0..100 {
        engine.append("app", &format!("record {i:03}")).unwrap();
    }
    drop(engine);

    let files = parts(temp_dir.path(), "app");
    assert!(files.len() > 1);
    for file in &files {
        assert!(std::fs::metadata(file).unwrap().len() < 256);
    }

    let texts: Vec<String> = records(temp_dir.path(), "app")
        .iter()
        .map(|r| split_record(r).1.to_owned())
        .collect();
    let expected: Vec<String> = (0..100).map(|i| format!("record {i:03}")).collect();
    assert_eq!(texts, expected);
}

#[test]
fn test_restart_continues_current_part() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("app.004.log"), b"earlier\r\n").unwrap();

    let engine = engine_in(&temp_dir, LogConfig::default());
    engine.append("app", "later").unwrap();
    drop(engine);

    let content = std::fs::read_to_string(temp_dir.path().join("app.004.log")).unwrap();
    assert!(content.starts_with("earlier\r\n"));
    assert!(content.ends_with("\tlater\r\n"));
}

#[test]
fn test_concurrent_appenders_never_interleave() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 200;

    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(engine_in(&temp_dir, LogConfig::default().with_log_size(8 * 1024)));

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let engine = Arc::clone(&engine);
            scope.spawn(move || {
                for i in 0..PER_THREAD {
                    engine.append("shared", &format!("writer {t} record {i}")).unwrap();
                }
            });
        }
    });
    drop(engine);

    let lines = records(temp_dir.path(), "shared");
    assert_eq!(lines.len(), THREADS * PER_THREAD);

    // Per writer, records appear in issue order within each part.
    let mut seen = vec![Vec::new(); THREADS];
    for line in &lines {
        let text = split_record(line).1;
        let mut words = text.split(' ');
        assert_eq!(words.next(), Some("writer"));
        let t: usize = words.next().unwrap().parse().unwrap();
        assert_eq!(words.next(), Some("record"));
        let i: usize = words.next().unwrap().parse().unwrap();
        seen[t].push(i);
    }
    for indices in &mut seen {
        indices.sort_unstable();
        assert_eq!(*indices, (0..PER_THREAD).collect::<Vec<_>>());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_writes_complete_in_place() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("direct.000.log");
    let storage = FileStorage::new();
    let pool = IoWorkerPool::new(2).unwrap();
    let file = AsyncLogFile::open(&storage, &pool, &path).unwrap();

    let completions: Vec<_> = (0..64u8)
        .map(|i| file.reserve_and_write(Bytes::from(vec![b'a' + i % 26; 16])).unwrap())
        .collect();
    let offsets: Vec<u64> = completions.iter().map(|c| c.offset()).collect();
    let written = futures::future::join_all(completions).await;
    assert!(written.iter().all(|r| matches!(r, Ok(16))));
    file.flush().await.unwrap();
    file.close().await.unwrap();

    assert_eq!(offsets, (0..64).map(|i| i * 16).collect::<Vec<u64>>());
    let content = std::fs::read(&path).unwrap();
    assert_eq!(content.len(), 64 * 16);
    for (i, chunk) in content.chunks(16).enumerate() {
        assert!(chunk.iter().all(|&b| b == b'a' + (i % 26) as u8));
    }
    assert!(storage.exists(&path).unwrap());
}
