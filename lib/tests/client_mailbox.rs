use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use pretty_assertions::assert_eq;

use pdu_transport::network::policy::{CloseMode, RwPolicy};
use pdu_transport::{Client, Error};

use helper::*;

/// `send_msg` with `WaitRead` only returns once the response has been processed.
/// The next message isn't written before that.
#[tokio::test]
async fn test_sequential_messages_are_serialized() -> Result<()> {
    let settings = get_settings();
    let events = EventLog::default();
    let mut server = TestServer::new(&events);
    server.delay = Some(Duration::from_millis(100));
    let (_registry, _shutdown) = start_server(&settings, server).await?;

    let client = Client::connect(&settings, Collector::new(&events)).await?;
    assert!(wait_for(|| events.count("connect") == 1).await);

    for pdu_type in [1u8, 2] {
        client
            .send_msg(rtr_frame(pdu_type, &[]), RwPolicy::WaitRead)
            .await?;
        events.push(format!("returned {pdu_type}"));
    }

    assert_eq!(
        events.events(),
        vec![
            "connect",
            "recv 1 (8 bytes)",
            "reply 1",
            "client got 1",
            "returned 1",
            "recv 2 (8 bytes)",
            "reply 2",
            "client got 2",
            "returned 2",
        ]
    );

    Ok(())
}

/// Concurrent callers share one session, whose request/response cycles never interleave.
#[tokio::test]
async fn test_concurrent_callers_never_interleave() -> Result<()> {
    let settings = get_settings();
    let events = EventLog::default();
    let mut server = TestServer::new(&events);
    server.delay = Some(Duration::from_millis(20));
    let (_registry, _shutdown) = start_server(&settings, server).await?;

    let client = Arc::new(Client::connect(&settings, Collector::new(&events)).await?);
    assert!(wait_for(|| events.count("connect") == 1).await);

    let mut tasks = Vec::new();
    for pdu_type in 1..=4u8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client
                .send_msg(rtr_frame(pdu_type, &[]), RwPolicy::WaitRead)
                .await
        }));
    }
    for task in tasks {
        task.await??;
    }

    // Every request is followed by its own reply, before the next request shows up.
    let cycles: Vec<Vec<String>> = events.events()[1..]
        .chunks(3)
        .map(|chunk| chunk.to_vec())
        .collect();
    assert_eq!(cycles.len(), 4);
    for cycle in cycles {
        let pdu_type = cycle[0]
            .strip_prefix("recv ")
            .and_then(|rest| rest.split(' ').next())
            .unwrap()
            .to_string();
        assert_eq!(
            cycle,
            vec![
                format!("recv {pdu_type} (8 bytes)"),
                format!("reply {pdu_type}"),
                format!("client got {pdu_type}"),
            ]
        );
    }

    Ok(())
}

/// `WaitWrite` returns right after writing, the response is picked up by a later read.
#[tokio::test]
async fn test_wait_write_does_not_read() -> Result<()> {
    let settings = get_settings();
    let events = EventLog::default();
    let (_registry, _shutdown) = start_server(&settings, TestServer::new(&events)).await?;

    let collector = Collector::new(&events);
    let responses = collector.responses.clone();
    let client = Client::connect(&settings, collector).await?;

    let frame = rtr_frame(0x05, &[9; 4]);
    client.send_msg(frame.clone(), RwPolicy::WaitWrite).await?;
    assert!(responses.lock().unwrap().is_empty());

    client.send_msg(Vec::new(), RwPolicy::WaitRead).await?;
    assert_eq!(*responses.lock().unwrap(), vec![frame]);

    Ok(())
}

/// After a close, every further intent is rejected.
#[rstest::rstest]
#[case(CloseMode::Graceful)]
#[case(CloseMode::Forcible)]
#[tokio::test]
async fn test_send_after_close(#[case] mode: CloseMode) -> Result<()> {
    let settings = get_settings();
    let events = EventLog::default();
    let (registry, _shutdown) = start_server(&settings, TestServer::new(&events)).await?;

    let client = Client::connect(&settings, Collector::new(&events)).await?;
    client.close(mode).await?;
    assert!(client.is_closed());
    assert_eq!(events.count("client close"), 1);

    let result = client
        .send_msg(rtr_frame(0x01, &[]), RwPolicy::WaitRead)
        .await;
    assert!(matches!(result, Err(Error::ConnectionClosed(_))));
    assert!(matches!(
        client.close(CloseMode::Graceful).await,
        Err(Error::ConnectionClosed(_))
    ));

    // The server notices as well.
    assert!(wait_for(|| registry.is_empty()).await);
    assert_eq!(events.count("close"), 1);
    assert_eq!(events.count("client close"), 1);

    Ok(())
}

/// Dialing a port nobody listens on fails right away.
#[tokio::test]
async fn test_connect_refused() {
    let settings = get_settings();
    let result = Client::connect(&settings, Collector::new(&EventLog::default())).await;

    assert!(result.is_err());
}

/// Rejecting the server in `on_connect` fails the connect, `on_close` still runs once.
#[tokio::test]
async fn test_client_rejects_in_on_connect() -> Result<()> {
    let settings = get_settings();
    let events = EventLog::default();
    let (registry, _shutdown) = start_server(&settings, TestServer::new(&events)).await?;

    let mut collector = Collector::new(&events);
    collector.reject = true;
    let result = Client::connect(&settings, collector).await;

    assert!(matches!(result, Err(Error::Process(_))));
    assert_eq!(events.count("client reject"), 1);
    assert_eq!(events.count("client close"), 1);
    assert!(wait_for(|| registry.is_empty()).await);

    Ok(())
}

/// A panic while handling the response closes the session instead of killing it silently.
#[tokio::test]
async fn test_panic_while_receiving() -> Result<()> {
    let settings = get_settings();
    let events = EventLog::default();
    let (registry, _shutdown) = start_server(&settings, TestServer::new(&events)).await?;

    let mut collector = Collector::new(&events);
    collector.panic_on_reply = true;
    let client = Client::connect(&settings, collector).await?;

    let result = client
        .send_msg(rtr_frame(0x02, &[]), RwPolicy::WaitRead)
        .await;
    assert!(matches!(result, Err(Error::Process(_))));
    assert!(client.is_closed());
    assert_eq!(events.count("client close"), 1);

    // The server sees the connection go away.
    assert!(wait_for(|| registry.is_empty()).await);
    assert_eq!(events.count("close"), 1);

    Ok(())
}
