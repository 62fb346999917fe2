use super::*;

fn scheduler(max_attempts: u32) -> (ReconnectScheduler, mpsc::UnboundedReceiver<ControllerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ReconnectScheduler::new(BackoffTable::default(), max_attempts, tx),
        rx,
    )
}

async fn next_token(rx: &mut mpsc::UnboundedReceiver<ControllerMessage>) -> u64 {
    match rx.recv().await {
        Some(ControllerMessage::ReconnectTimerFired { token }) => token,
        _ => panic!("expected a reconnect timer firing"),
    }
}

#[tokio::test(start_paused = true)]
async fn first_schedule_arms_five_second_timer() {
    let (mut scheduler, mut rx) = scheduler(DEFAULT_MAX_ATTEMPTS);

    let armed = scheduler.schedule("NAVIGATION").expect("budget left");
    assert_eq!(
        armed,
        Some(ArmedReconnect {
            attempt: 1,
            delay: Duration::from_secs(5),
        })
    );
    assert!(scheduler.is_reconnecting());
    assert!(scheduler.has_pending_timer());

    tokio::time::sleep(Duration::from_millis(4_999)).await;
    assert!(rx.try_recv().is_err(), "timer fired early");

    let token = next_token(&mut rx).await;
    assert!(scheduler.fire(token));
    assert!(scheduler.is_initializing());
    assert!(!scheduler.fire(token), "a firing is consumed once");
}

#[tokio::test(start_paused = true)]
async fn scheduling_while_reconnecting_is_a_no_op() {
    let (mut scheduler, _rx) = scheduler(DEFAULT_MAX_ATTEMPTS);
    scheduler.schedule("first").expect("armed");

    assert_eq!(scheduler.schedule("second"), Ok(None));
    assert_eq!(scheduler.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stops_once_budget_is_spent() {
    let (mut scheduler, mut rx) = scheduler(2);

    for expected in 1..=2 {
        let armed = scheduler.schedule("failed").expect("budget").expect("armed");
        assert_eq!(armed.attempt, expected);
        let token = next_token(&mut rx).await;
        assert!(scheduler.fire(token));
        scheduler.initialize_failed();
    }

    assert_eq!(
        scheduler.schedule("failed"),
        Err(GatewayError::MaxAttemptsExceeded { max: 2 })
    );
    assert_eq!(scheduler.attempt_count(), 2);
    assert!(!scheduler.is_reconnecting());
}

#[tokio::test(start_paused = true)]
async fn cancel_drops_the_pending_timer() {
    let (mut scheduler, mut rx) = scheduler(DEFAULT_MAX_ATTEMPTS);
    scheduler.schedule("NAVIGATION").expect("armed");
    scheduler.cancel();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(rx.try_recv().is_err());
    assert!(!scheduler.is_reconnecting());
    assert_eq!(scheduler.attempt_count(), 1, "cancel keeps the counter");
}

#[tokio::test(start_paused = true)]
async fn ready_resets_counter_and_closes_cycle() {
    let (mut scheduler, _rx) = scheduler(DEFAULT_MAX_ATTEMPTS);
    scheduler.schedule("NAVIGATION").expect("armed");

    scheduler.on_ready(false);
    assert_eq!(scheduler.attempt_count(), 0);
    assert!(!scheduler.is_reconnecting());
}

#[tokio::test(start_paused = true)]
async fn stale_tokens_are_rejected_after_rearming() {
    let (mut scheduler, mut rx) = scheduler(DEFAULT_MAX_ATTEMPTS);
    scheduler.schedule("first").expect("armed");
    let first = next_token(&mut rx).await;
    assert!(scheduler.fire(first));
    scheduler.initialize_failed();

    scheduler.schedule("second").expect("armed");
    assert!(!scheduler.fire(first));
    let second = next_token(&mut rx).await;
    assert!(scheduler.fire(second));
}

#[tokio::test(start_paused = true)]
async fn retry_stays_open_until_ready() {
    let (mut scheduler, mut rx) = scheduler(DEFAULT_MAX_ATTEMPTS);
    scheduler.schedule("NAVIGATION").expect("armed");
    let token = next_token(&mut rx).await;
    assert!(scheduler.fire(token));

    scheduler.initialize_succeeded();
    assert!(scheduler.is_awaiting_ready());
    assert!(scheduler.is_reconnecting());
    assert_eq!(scheduler.schedule("again"), Ok(None));

    scheduler.on_ready(false);
    assert!(!scheduler.is_reconnecting());
    assert_eq!(scheduler.attempt_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn abandoned_attempt_allows_the_next_schedule() {
    let (mut scheduler, mut rx) = scheduler(DEFAULT_MAX_ATTEMPTS);
    scheduler.schedule("NAVIGATION").expect("armed");
    let token = next_token(&mut rx).await;
    assert!(scheduler.fire(token));
    scheduler.initialize_succeeded();

    scheduler.abandon_attempt();
    let armed = scheduler.schedule("dropped").expect("budget").expect("armed");
    assert_eq!(armed.attempt, 2);
    assert_eq!(armed.delay, Duration::from_secs(15));
}

#[test]
fn startup_initialize_closes_on_success() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut scheduler = ReconnectScheduler::new(BackoffTable::default(), DEFAULT_MAX_ATTEMPTS, tx);
    scheduler.begin_initialize();
    assert!(scheduler.is_reconnecting());

    scheduler.initialize_succeeded();
    assert!(!scheduler.is_reconnecting());
}
