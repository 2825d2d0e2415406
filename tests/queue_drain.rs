use std::sync::Arc;
use std::time::Duration;

use receipt_printer::fake::FakeTransport;
use receipt_printer::protocol::preview_lines;
use receipt_printer::{
    DrainReport, MemoryStore, PaymentMethod, PrintService, PrinterConfig, PrinterDevice,
    PrinterEventKind, ReceiptData,
};

fn service(fake: Arc<FakeTransport>) -> PrintService {
    let config = PrinterConfig::default()
        .with_chunking(64, Duration::ZERO)
        .with_job_delay(Duration::ZERO);
    PrintService::new(fake, Arc::new(MemoryStore::new()), config)
}

fn receipt(total: i64) -> ReceiptData {
    ReceiptData::new(total, PaymentMethod::Cash)
}

#[tokio::test]
async fn failing_jobs_are_dropped_after_three_drains() {
    let fake = Arc::new(FakeTransport::new());
    let service = service(fake.clone());
    let queue = service.queue();
    for total in [1, 2, 3] {
        queue.enqueue(receipt(total)).unwrap();
    }
    service.manager().connect().await;
    fake.set_fail_writes(true);

    for pass in 1..=3u32 {
        let report = queue.process_queue().await;
        assert_eq!(report, DrainReport { success: 0, failed: 3 }, "pass {pass}");
        if pass < 3 {
            let jobs = queue.jobs().unwrap();
            assert_eq!(jobs.len(), 3);
            assert!(jobs.iter().all(|j| j.retries == pass));
        }
    }
    assert_eq!(queue.count().unwrap(), 0);
}

#[tokio::test]
async fn successful_drain_prints_in_order() {
    let fake = Arc::new(FakeTransport::new());
    let service = service(fake.clone());
    let queue = service.queue();
    for total in [1000, 2000, 3000] {
        queue.enqueue(receipt(total)).unwrap();
    }
    service.manager().connect().await;
    let mut rx = queue.subscribe();

    let report = queue.process_queue().await;

    assert_eq!(report, DrainReport { success: 3, failed: 0 });
    assert_eq!(queue.count().unwrap(), 0);

    let mut pending = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PrinterEventKind::QueueUpdated { pending: n } = event.kind {
            pending.push(n);
        }
    }
    assert_eq!(pending, vec![2, 1, 0]);

    let totals: Vec<String> = preview_lines(&fake.written())
        .into_iter()
        .filter(|l| l.starts_with("TOTAL"))
        .collect();
    assert_eq!(totals.len(), 3);
    assert!(totals[0].ends_with("1 000 FCFA"));
    assert!(totals[1].ends_with("2 000 FCFA"));
    assert!(totals[2].ends_with("3 000 FCFA"));
}

#[tokio::test]
async fn second_drain_while_draining_is_a_noop() {
    let fake = Arc::new(FakeTransport::new());
    fake.set_write_delay(Duration::from_millis(2));
    let service = service(fake.clone());
    let queue = service.queue();
    queue.enqueue(receipt(500)).unwrap();
    service.manager().connect().await;

    let (first, second) = tokio::join!(queue.process_queue(), async {
        assert!(queue.is_draining());
        let count = queue.count().unwrap();
        let report = queue.process_queue().await;
        assert_eq!(queue.count().unwrap(), count);
        report
    });

    assert_eq!(second, DrainReport::default());
    assert_eq!(first, DrainReport { success: 1, failed: 0 });
    assert!(!queue.is_draining());
}

#[tokio::test]
async fn connected_event_triggers_one_drain() {
    let fake = Arc::new(FakeTransport::new());
    let service = service(fake.clone());
    let queue = service.queue().clone();
    let id = queue.enqueue(receipt(500)).unwrap();
    service.manager().connect().await;
    fake.set_fail_writes(true);

    let auto = service.setup_auto_process();
    service.manager().events().emit(PrinterEventKind::Connected {
        device: PrinterDevice {
            id: "AA:BB:CC:DD:EE:01".into(),
            name: "MTP-II".into(),
            connected: true,
        },
    });

    let retries = || queue.jobs().unwrap().iter().find(|j| j.id == id).map(|j| j.retries);
    for _ in 0..100 {
        if retries() == Some(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(retries(), Some(1));

    // no further drain without another connected event
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(retries(), Some(1));
    assert!(auto.is_running());
    auto.stop();
}

#[tokio::test]
async fn reconnect_drains_offline_receipts() {
    let fake = Arc::new(FakeTransport::new());
    let service = service(fake.clone());
    let _auto = service.setup_auto_process();
    let mut rx = service.queue().subscribe();

    service.print(receipt(2500)).await.unwrap();
    assert_eq!(service.queue().count().unwrap(), 1);

    assert!(service.manager().connect().await);
    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.kind == (PrinterEventKind::QueueUpdated { pending: 0 }) => break,
                Ok(_) => {}
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await;

    assert!(drained.is_ok());
    assert_eq!(service.queue().count().unwrap(), 0);
    assert!(!fake.written().is_empty());
}

#[tokio::test]
async fn stopped_auto_process_ignores_connects() {
    let fake = Arc::new(FakeTransport::new());
    let service = service(fake.clone());
    service.setup_auto_process().stop();

    service.print(receipt(2500)).await.unwrap();
    service.manager().connect().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(service.queue().count().unwrap(), 1);
    assert!(fake.written().is_empty());
}

#[tokio::test]
async fn auto_drain_recovers_a_connect_lost_to_lag() {
    let fake = Arc::new(FakeTransport::new());
    let mut config = PrinterConfig::default()
        .with_chunking(64, Duration::ZERO)
        .with_job_delay(Duration::ZERO);
    config.event_capacity = 4;
    let service = PrintService::new(fake.clone(), Arc::new(MemoryStore::new()), config);
    let queue = service.queue().clone();
    let _auto = service.setup_auto_process();

    queue.enqueue(receipt(100)).unwrap();
    assert!(service.manager().connect().await);
    // the auto drain task has not run yet; bury the connect event
    for total in 2..=6 {
        queue.enqueue(receipt(total)).unwrap();
    }

    for _ in 0..100 {
        if queue.count().unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(queue.count().unwrap(), 0);
    assert!(!fake.written().is_empty());
}
