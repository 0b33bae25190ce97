use courier_events::{CancellationToken, EventName, FullQueuePolicy, HubOptions};
use courier_relay::{Heartbeat, MetricSample, Relay, RelayConfig, RelayStats};
use std::io::Write;
use tokio::io::BufReader;

const INPUT: &str = r#"{"kind":"heartbeat","source":"edge-1","seq":1}
{"kind":"text","channel":"ops","body":"deploy finished"}

{"kind":"metric","name":"cpu","value":0.42}
{"kind":"signal","name":"Alive"}
{"kind":"video","url":"rtsp://camera"}
{"kind":"heartbeat","source":"edge-1","seq":2}
"#;

#[tokio::test]
async fn test_pump_forwards_and_audits_every_message() {
    let relay = Relay::start(HubOptions::default()).unwrap();
    let ctx = CancellationToken::new();

    let stats = relay.pump(BufReader::new(INPUT.as_bytes()), &ctx).await.unwrap();
    assert_eq!(stats, RelayStats { forwarded: 4, signals: 1, rejected: 1 });

    relay.hub().drain(&ctx).await.unwrap();
    assert_eq!(relay.audited(), 4);

    let snapshot = relay.finish(&ctx).await.unwrap().unwrap();
    let heartbeat = EventName::of::<Heartbeat>();
    let metrics = snapshot.event(&heartbeat, "dyn courier_relay::message::Audited").unwrap();
    assert_eq!(metrics.published, 2);
    assert_eq!(metrics.processed, 2);
    assert_eq!(metrics.handler_errors, 0);
}

#[tokio::test]
async fn test_signals_reach_wildcard_only() {
    let relay = Relay::start(HubOptions::default()).unwrap();
    let ctx = CancellationToken::new();

    let input = "{\"kind\":\"signal\",\"name\":\"Alive\"}\n".repeat(3);
    let stats = relay.pump(BufReader::new(input.as_bytes()), &ctx).await.unwrap();
    assert_eq!(stats.signals, 3);

    let snapshot = relay.finish(&ctx).await.unwrap().unwrap();
    let alive = snapshot.event("Alive", "signal").unwrap();
    assert_eq!((alive.published, alive.processed), (3, 3));
}

#[tokio::test]
async fn test_cancelled_input_stops_pump() {
    let relay = Relay::start(HubOptions::default()).unwrap();
    let ctx = CancellationToken::new();
    ctx.cancel();

    let stats = relay.pump(BufReader::new(INPUT.as_bytes()), &ctx).await.unwrap();
    assert_eq!(stats, RelayStats::default());
    assert!(relay.finish(&CancellationToken::new()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_closed_hub_fails_forwarding() {
    let relay = Relay::start(HubOptions::default()).unwrap();
    let ctx = CancellationToken::new();
    relay.hub().close().await.unwrap();

    let err = relay.pump(BufReader::new(INPUT.as_bytes()), &ctx).await.unwrap_err();
    assert!(err.to_string().contains("Failed to forward envelope"));
    assert!(relay.finish(&ctx).await.is_err());
}

#[tokio::test]
async fn test_metrics_disabled_yields_no_snapshot() {
    let relay = Relay::start(HubOptions::default().with_metrics(false)).unwrap();
    let ctx = CancellationToken::new();
    let line = r#"{"kind":"metric","name":"mem","value":1.5}"#;

    let stats = relay.pump(BufReader::new(line.as_bytes()), &ctx).await.unwrap();
    assert_eq!(stats.forwarded, 1);
    assert!(relay.finish(&ctx).await.unwrap().is_none());
    assert_eq!(EventName::of::<MetricSample>().as_str(), "courier_relay::message::MetricSample");
}

#[test]
fn test_config_file_sections() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[hub]
max_queue_capacity = 16
full_queue_policy = "drop_oldest"

[log]
level = "debug"
json = true
"#
    )
    .unwrap();

    let config = RelayConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.hub.max_queue_capacity, Some(16));
    assert_eq!(config.hub.full_queue_policy, FullQueuePolicy::DropOldest);
    assert!(config.hub.strict_completion);
    assert_eq!(config.log.level, "debug");
    assert!(config.log.json);
    assert!(config.log.console);
}

#[test]
fn test_missing_config_falls_back_to_defaults() {
    let config = RelayConfig::load(None).unwrap();
    assert_eq!(config.hub, HubOptions::default());

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[hub]\nmax_queue_capacity = 0").unwrap();
    assert!(RelayConfig::load(Some(file.path())).is_err());
}
