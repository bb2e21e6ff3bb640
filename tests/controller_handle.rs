use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio::time::Instant;

use matouch::{
    ClimateController, ControllerConfig, ControllerHandle, CycleOutcome, CycleOutcomeKind,
    CycleReport, FakeThermostat, FakeThermostatConfig, FakeThermostatProbe, Temperature,
};

fn spawn_with(config: ControllerConfig) -> (ControllerHandle, FakeThermostatProbe) {
    let fake = FakeThermostat::new(FakeThermostatConfig::default());
    let probe = fake.probe();
    let handle = ClimateController::spawn(Box::new(fake), config).expect("config should validate");
    (handle, probe)
}

fn long_initial_delay() -> ControllerConfig {
    ControllerConfig::builder()
        .initial_delay(Duration::from_secs(3600))
        .build()
}

async fn next_report(reports: &mut tokio::sync::watch::Receiver<Option<CycleReport>>) -> CycleReport {
    reports.changed().await.expect("controller should keep running");
    reports
        .borrow_and_update()
        .expect("a report should follow every finished cycle")
}

#[tokio::test(start_paused = true)]
async fn timer_runs_first_cycle_after_initial_delay_then_every_interval() {
    let start = Instant::now();
    let (handle, _probe) = spawn_with(ControllerConfig::default());
    let mut reports = handle.cycle_reports();

    let first = next_report(&mut reports).await;
    assert_eq!(
        CycleReport {
            number: 1,
            outcome: CycleOutcomeKind::Updated,
        },
        first
    );
    assert!(start.elapsed() >= Duration::from_millis(250));
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(Temperature::from_tenths(220), handle.snapshot().current_temperature);

    let second = next_report(&mut reports).await;
    assert_eq!(2, second.number);
    assert!(start.elapsed() >= Duration::from_millis(10_250));

    handle.shutdown().await.expect("controller should stop");
}

#[tokio::test(start_paused = true)]
async fn refresh_runs_a_cycle_on_demand() {
    let (handle, probe) = spawn_with(long_initial_delay());

    let outcome = handle.refresh().await.expect("controller should answer");

    assert_matches!(outcome, CycleOutcome::Updated);
    assert_eq!(Temperature::from_tenths(210), handle.snapshot().heating_setpoint);
    assert_eq!(1, probe.connect_attempts());
    handle.shutdown().await.expect("controller should stop");
}

#[tokio::test(start_paused = true)]
async fn change_waits_for_the_next_cycle_by_default() {
    let (handle, probe) = spawn_with(long_initial_delay());
    let mut snapshots = handle.subscribe();

    assert!(handle.set_heating_setpoint(18.0).await.expect("apply should succeed"));
    snapshots.changed().await.expect("snapshot should be republished");

    assert_eq!(
        Temperature::from_tenths(180),
        snapshots.borrow_and_update().heating_setpoint
    );
    assert_eq!(0, probe.connect_attempts());

    handle.refresh().await.expect("controller should answer");
    assert_eq!(vec![0x80, 0x01], probe.status_payload()[29..31].to_vec());
    handle.shutdown().await.expect("controller should stop");
}

#[tokio::test(start_paused = true)]
async fn change_triggers_a_cycle_when_update_on_change_is_set() {
    let config = ControllerConfig::builder()
        .initial_delay(Duration::from_secs(3600))
        .update_on_change(true)
        .build();
    let (handle, probe) = spawn_with(config);
    let mut reports = handle.cycle_reports();

    assert!(handle.set_cooling_setpoint(26.5).await.expect("apply should succeed"));
    let report = next_report(&mut reports).await;

    assert_eq!(1, report.number);
    assert_eq!(vec![0x65, 0x02], probe.status_payload()[27..29].to_vec());
    assert_eq!(Temperature::from_tenths(265), handle.snapshot().cooling_setpoint);
    handle.shutdown().await.expect("controller should stop");
}

#[tokio::test(start_paused = true)]
async fn unchanged_value_does_not_trigger_a_cycle() {
    let config = ControllerConfig::builder()
        .initial_delay(Duration::from_secs(3600))
        .update_on_change(true)
        .build();
    let (handle, probe) = spawn_with(config);

    assert!(!handle.set_power(false).await.expect("apply should succeed"));

    assert_eq!(0, probe.connect_attempts());
    assert_eq!(None, *handle.cycle_reports().borrow());
    handle.shutdown().await.expect("controller should stop");
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_timer() {
    let (handle, probe) = spawn_with(ControllerConfig::default());
    let mut reports = handle.cycle_reports();
    next_report(&mut reports).await;

    handle.shutdown().await.expect("controller should stop");
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(1, probe.connect_attempts());
    assert!(!probe.is_connected());
}
