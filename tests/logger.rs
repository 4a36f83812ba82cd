use std::{fs, thread, time::Duration};

use motor_bench::{
    telemetry::{FrameSchema, TelemetryFrame},
    utils::logger::{AsyncLogger, LogRecord},
};

fn frame(seq: u32) -> TelemetryFrame {
    let values = (0..14).map(|i| (seq * 14 + i) as f32 / 8.0).collect();
    TelemetryFrame::new(FrameSchema::Bench14, values).unwrap()
}

#[test]
fn stop_flushes_everything_enqueued_from_many_threads() {
    let dir = tempfile::tempdir().unwrap();
    let logger = AsyncLogger::start(dir.path(), "threads", FrameSchema::Bench14, false).unwrap();

    let producers: Vec<_> = (0..4)
        .map(|t| {
            let tx = logger.sender();
            thread::spawn(move || {
                for i in 0..200 {
                    tx.send(LogRecord::new(frame(t * 1000 + i), None)).unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    for i in 0..50 {
        assert!(logger.enqueue(LogRecord::new(frame(i), None)));
    }
    assert_eq!(logger.dropped_count(), 0);

    let path = logger.stop().unwrap();
    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.len(), 1 + 14);

    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 4 * 200 + 50);
    for row in &rows {
        assert_eq!(row.len(), 15);
        for field in row.iter().skip(1) {
            let (_, decimals) = field.split_once('.').unwrap();
            assert_eq!(decimals.len(), 6, "{}", field);
        }
    }
}

#[test]
fn records_written_after_idle_period_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let logger = AsyncLogger::start(dir.path(), "idle", FrameSchema::Bench14, true).unwrap();

    // consumer goes through at least one empty wait
    thread::sleep(Duration::from_millis(600));
    logger.enqueue(LogRecord::new(frame(1), Some(1450)));
    logger.enqueue(LogRecord::new(frame(2), Some(1460)));

    let path = logger.stop().unwrap();
    let text = fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].ends_with(",1450"));
    assert!(lines[2].ends_with(",1460"));
}
