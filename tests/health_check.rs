// ABOUTME: Integration tests for the health probe retry loop.
// ABOUTME: Exercises success, exhaustion and attempt pacing against the simulated host.

mod support;

use std::net::Ipv4Addr;
use std::time::Duration;

use jailwarden::health::HealthProbe;
use support::fake_host::FakeHost;

const BLUE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

fn probe(attempts: u32) -> HealthProbe {
    HealthProbe {
        path: "/up".to_string(),
        attempts,
        interval: Duration::from_millis(1),
        request_timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn healthy_unit_passes_on_first_attempt() {
    let host = FakeHost::provisioned().with_unit("shop_blue", BLUE, true);

    let attempts = probe(5).check(&host, BLUE, 4000).await.unwrap();

    assert_eq!(attempts, 1);
    let probes: Vec<String> = host
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("fetch"))
        .collect();
    assert_eq!(probes.len(), 1);
    assert!(probes[0].contains("http://10.0.0.2:4000/up"));
    assert!(probes[0].contains("-T 2"));
}

#[tokio::test]
async fn slow_start_succeeds_within_budget() {
    let host = FakeHost::provisioned().with_unit("shop_blue", BLUE, true);
    host.slow_start(2);

    let attempts = probe(5).check(&host, BLUE, 4000).await.unwrap();

    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn exhaustion_reports_attempts_and_last_failure() {
    let host = FakeHost::provisioned().with_unit("shop_blue", BLUE, true);
    host.unhealthy(BLUE);

    let err = probe(3).check(&host, BLUE, 4000).await.unwrap_err();

    assert_eq!(err.attempts, 3);
    assert_eq!(err.address, BLUE);
    assert!(err.last_failure.contains("Connection refused"));
    assert!(err.to_string().contains("10.0.0.2:4000"));
    let probes = host
        .commands()
        .iter()
        .filter(|c| c.starts_with("fetch"))
        .count();
    assert_eq!(probes, 3);
}

#[tokio::test]
async fn zero_attempts_still_probes_once() {
    let host = FakeHost::provisioned();

    let err = probe(0).check(&host, BLUE, 4000).await.unwrap_err();

    assert_eq!(err.attempts, 1);
}

mod timing {
    use super::*;
    use tokio::time::Instant;

    fn paced(attempts: u32) -> HealthProbe {
        HealthProbe {
            path: "/up".to_string(),
            attempts,
            interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_waits_between_attempts_but_not_after_the_last() {
        let host = FakeHost::provisioned().with_unit("shop_blue", BLUE, true);
        host.unhealthy(BLUE);
        let started = Instant::now();

        let err = paced(3).check(&host, BLUE, 4000).await.unwrap_err();

        let elapsed = started.elapsed();
        assert_eq!(err.attempts, 3);
        assert!(elapsed >= Duration::from_secs(4), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(6), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn success_stops_waiting() {
        let host = FakeHost::provisioned().with_unit("shop_blue", BLUE, true);
        host.slow_start(1);
        let started = Instant::now();

        let attempts = paced(5).check(&host, BLUE, 4000).await.unwrap();

        assert_eq!(attempts, 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_reaches_fetch() {
        let host = FakeHost::provisioned().with_unit("shop_blue", BLUE, true);

        paced(3).check(&host, BLUE, 4000).await.unwrap();

        let commands = host.commands();
        let probe = commands
            .iter()
            .find(|c| c.starts_with("fetch"))
            .expect("a fetch probe");
        assert!(probe.contains("-T 5 "), "probe command: {probe}");
    }
}

#[test]
fn probe_url_normalises_path() {
    let probe = HealthProbe {
        path: "health".to_string(),
        ..HealthProbe::default()
    };
    assert_eq!(probe.url(BLUE, 8080), "http://10.0.0.2:8080/health");
}
