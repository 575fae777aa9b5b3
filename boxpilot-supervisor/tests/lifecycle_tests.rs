//! Lifecycle state machine with stand-in kernels (`sleep`, `true`) and a
//! recording platform.
#![cfg(unix)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boxpilot_core::{KernelStatus, ProxyMode};
use boxpilot_supervisor::{
    ElevationOutcome, KernelCommand, Platform, PlatformError, Supervisor, SupervisorError,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakePlatform {
    calls: Mutex<Vec<String>>,
    elevated: bool,
    relaunch_fails: bool,
    proxy_delay: Duration,
}

impl FakePlatform {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl Platform for FakePlatform {
    fn set_system_proxy(&self, addr: SocketAddr) -> Result<(), PlatformError> {
        std::thread::sleep(self.proxy_delay);
        self.record(format!("set {addr}"));
        Ok(())
    }

    fn clear_system_proxy(&self) -> Result<(), PlatformError> {
        self.record("clear");
        Ok(())
    }

    fn is_elevated(&self) -> bool {
        self.elevated
    }

    fn relaunch_elevated(&self, _exe: &Path, args: &[String]) -> Result<(), PlatformError> {
        if self.relaunch_fails {
            return Err(PlatformError::Unsupported("elevation"));
        }
        self.record(format!("relaunch {}", args.join(" ")));
        Ok(())
    }

    fn register_autostart(&self, exe: &Path) -> Result<String, PlatformError> {
        self.record(format!("autostart {}", exe.display()));
        Ok("fake".to_string())
    }

    fn unregister_autostart(&self) -> Result<(), PlatformError> {
        self.record("no autostart");
        Ok(())
    }
}

fn sleeper() -> KernelCommand {
    KernelCommand::new("sleep", ["30"])
}

fn exits_immediately() -> KernelCommand {
    KernelCommand::new("true", Vec::<String>::new())
}

async fn wait_until_stopped(sup: &Supervisor) {
    for _ in 0..100 {
        if sup.status().await == KernelStatus::Stopped {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("exited kernel still reported as running");
}

fn supervisor(command: KernelCommand, platform: &Arc<FakePlatform>) -> Supervisor {
    Supervisor::new(command, platform.clone()).with_stop_timeout(Duration::from_secs(2))
}

// ---------------------------------------------------------------------------
// 1. Start / stop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_start_and_second_stop_are_rejected() {
    let platform = Arc::new(FakePlatform::default());
    let sup = supervisor(sleeper(), &platform).with_mode(ProxyMode::Tun);

    let pid = sup.start().await.expect("start");
    match sup.start().await {
        Err(SupervisorError::AlreadyRunning { pid: running }) => assert_eq!(running, pid),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
    assert_eq!(sup.status().await, KernelStatus::Running { pid });

    sup.stop().await.expect("stop");
    assert!(matches!(sup.stop().await, Err(SupervisorError::NotRunning)));
    assert_eq!(sup.status().await, KernelStatus::Stopped);
    assert_eq!(platform.calls(), vec!["clear"]);
}

#[tokio::test]
async fn crashed_kernel_is_treated_as_absent() {
    let platform = Arc::new(FakePlatform::default());
    let sup = supervisor(exits_immediately(), &platform).with_mode(ProxyMode::Tun);

    sup.start().await.expect("start");
    wait_until_stopped(&sup).await;

    // A dead handle does not block the next start.
    sup.start().await.expect("restart after crash");
    sup.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn crashed_kernel_in_system_mode_clears_proxy() {
    let platform = Arc::new(FakePlatform::default());
    let sup = supervisor(exits_immediately(), &platform);

    sup.start().await.expect("start");
    wait_until_stopped(&sup).await;
    sup.shutdown().await.expect("shutdown");

    assert_eq!(platform.calls(), vec!["set 127.0.0.1:2080", "clear"]);
}

#[tokio::test]
async fn missing_binary_is_a_spawn_error() {
    let platform = Arc::new(FakePlatform::default());
    let sup = supervisor(KernelCommand::new("/nonexistent/sing-box", ["run"]), &platform);

    match sup.start().await {
        Err(SupervisorError::Spawn { program, .. }) => assert_eq!(program, "/nonexistent/sing-box"),
        other => panic!("expected Spawn, got {other:?}"),
    }
    assert_eq!(sup.status().await, KernelStatus::Stopped);
    assert!(platform.calls().is_empty());
}

#[tokio::test]
async fn restart_of_stopped_kernel_just_starts() {
    let platform = Arc::new(FakePlatform::default());
    let sup = supervisor(sleeper(), &platform).with_mode(ProxyMode::Tun);

    let pid = sup.restart().await.expect("restart");
    assert_eq!(sup.status().await.pid(), Some(pid));
    sup.shutdown().await.expect("shutdown");
    sup.shutdown().await.expect("second shutdown is a no-op");
}

#[tokio::test]
async fn telemetry_absent_without_control_client() {
    let platform = Arc::new(FakePlatform::default());
    let sup = supervisor(sleeper(), &platform).with_mode(ProxyMode::Tun);

    sup.start().await.expect("start");
    assert!(sup.telemetry().await.is_none());
    sup.stop().await.expect("stop");
}

// ---------------------------------------------------------------------------
// 2. Mode changes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_mode_has_no_side_effects() {
    let platform = Arc::new(FakePlatform::default());
    let sup = supervisor(sleeper(), &platform);

    let err = sup.change_mode("bogus").await.unwrap_err();
    assert!(matches!(err, SupervisorError::UnknownMode(_)));
    assert!(err.to_string().contains("unknown proxy mode 'bogus'"));
    assert!(platform.calls().is_empty());
    assert_eq!(sup.mode().await, ProxyMode::System);
    assert_eq!(sup.status().await, KernelStatus::Stopped);
}

#[tokio::test]
async fn system_mode_while_stopped_only_sets_proxy() {
    let platform = Arc::new(FakePlatform::default());
    let sup = supervisor(sleeper(), &platform).with_mode(ProxyMode::Tun);

    assert_eq!(sup.change_mode("System").await.expect("mode"), ProxyMode::System);
    assert_eq!(platform.calls(), vec!["set 127.0.0.1:2080"]);
    assert_eq!(sup.status().await, KernelStatus::Stopped);
}

#[tokio::test]
async fn switching_to_tun_restarts_and_clears_proxy() {
    let platform = Arc::new(FakePlatform::default());
    let sup = supervisor(sleeper(), &platform);

    let before = sup.start().await.expect("start");
    assert_eq!(platform.calls(), vec!["set 127.0.0.1:2080"]);

    assert_eq!(sup.change_mode("tun").await.expect("mode"), ProxyMode::Tun);
    let after = sup.status().await.pid().expect("kernel running after restart");
    assert_ne!(before, after);
    assert_eq!(
        platform.calls(),
        vec!["set 127.0.0.1:2080", "clear", "clear"]
    );

    sup.stop().await.expect("stop");
}

#[tokio::test]
async fn restart_in_system_mode_restores_proxy() {
    let platform = Arc::new(FakePlatform::default());
    let sup = supervisor(sleeper(), &platform);

    sup.start().await.expect("start");
    sup.restart().await.expect("restart");
    assert_eq!(platform.calls().last().map(String::as_str), Some("set 127.0.0.1:2080"));
    sup.stop().await.expect("stop");
    assert_eq!(platform.calls().last().map(String::as_str), Some("clear"));
}

#[tokio::test]
async fn slow_platform_tools_do_not_block_the_runtime() {
    let platform = Arc::new(FakePlatform {
        proxy_delay: Duration::from_millis(500),
        ..Default::default()
    });
    let sup = Arc::new(supervisor(sleeper(), &platform).with_mode(ProxyMode::Tun));

    let switching = tokio::spawn({
        let sup = sup.clone();
        async move { sup.change_mode("system").await }
    });
    let started = std::time::Instant::now();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(
        started.elapsed() < Duration::from_millis(400),
        "runtime was blocked for {:?}",
        started.elapsed()
    );

    assert_eq!(switching.await.unwrap().expect("mode"), ProxyMode::System);
    assert_eq!(platform.calls(), vec!["set 127.0.0.1:2080"]);
}

// ---------------------------------------------------------------------------
// 3. Elevation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn already_elevated_is_a_no_op() {
    let platform = Arc::new(FakePlatform {
        elevated: true,
        ..Default::default()
    });
    let sup = supervisor(sleeper(), &platform).with_mode(ProxyMode::Tun);
    let pid = sup.start().await.expect("start");

    let outcome = sup.restart_as_admin(&[]).await.expect("elevate");
    assert_eq!(outcome, ElevationOutcome::AlreadyElevated);
    assert_eq!(sup.status().await, KernelStatus::Running { pid });
    sup.stop().await.expect("stop");
}

#[tokio::test]
async fn elevation_stops_kernel_then_relaunches() {
    let platform = Arc::new(FakePlatform::default());
    let sup = supervisor(sleeper(), &platform).with_mode(ProxyMode::Tun);
    sup.start().await.expect("start");

    let outcome = sup
        .restart_as_admin(&["run".to_string()])
        .await
        .expect("elevate");
    assert_eq!(outcome, ElevationOutcome::Relaunched);
    assert_eq!(sup.status().await, KernelStatus::Stopped);
    assert_eq!(platform.calls(), vec!["clear", "relaunch run"]);
}

#[tokio::test]
async fn failed_relaunch_is_an_elevation_error() {
    let platform = Arc::new(FakePlatform {
        relaunch_fails: true,
        ..Default::default()
    });
    let sup = supervisor(sleeper(), &platform);

    let err = sup.restart_as_admin(&[]).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Elevation { .. }), "got: {err:?}");
}

#[tokio::test]
async fn autostart_passes_through_to_platform() {
    let platform = Arc::new(FakePlatform::default());
    let sup = supervisor(sleeper(), &platform);

    assert_eq!(
        sup.register_autostart(Path::new("/usr/bin/boxpilot"))
            .await
            .expect("register"),
        "fake"
    );
    sup.unregister_autostart().await.expect("unregister");
    assert_eq!(platform.calls(), vec!["autostart /usr/bin/boxpilot", "no autostart"]);
}
