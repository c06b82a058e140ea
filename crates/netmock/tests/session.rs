//! End-to-end session tests driven through the in-memory driver.

use netmock::{
    DriverCall, InterceptConfig, InterceptSession, MockOptions, NetmockError, ObservedResponse,
    RequestDescriptor, ScriptedDriver, Times, UrlPattern, WaitConfig,
};
use serde_json::json;
use std::time::Duration;

fn start() -> (InterceptSession, ScriptedDriver) {
    start_with(&InterceptConfig::default())
}

fn start_with(config: &InterceptConfig) -> (InterceptSession, ScriptedDriver) {
    netmock::logger::init_logger(false, true, true);
    let (driver, events) = ScriptedDriver::new();
    let session = InterceptSession::start(driver.clone(), events, config).expect("session starts");
    (session, driver)
}

fn get(url: &str) -> RequestDescriptor {
    RequestDescriptor::new("GET", url).with_resource_type("Fetch")
}

#[tokio::test]
async fn auto_mock_serves_json_and_counts_the_call() {
    let (session, driver) = start();
    let api = session
        .register_mock("/api", MockOptions::new().with_body(json!({"result": "X"})))
        .unwrap();

    let id = driver.dispatch(get("http://localhost:3000/api"));
    let response = driver.wait_for_fulfillment(&id).await.expect("request fulfilled");
    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_deref(), Some(r#"{"result":"X"}"#));

    let matched = session
        .filter()
        .url("http://localhost:3000/api")
        .mocked(true)
        .response_body(json!({"result": "X"}))
        .await
        .unwrap();
    assert_eq!(matched.len(), 1);

    api.called().unwrap();
    assert_eq!(api.times_called(), 1);
    // The network was never contacted.
    assert!(!driver
        .calls_for(&id)
        .iter()
        .any(|call| matches!(call, DriverCall::Continue(_))));

    session.close().await.unwrap();
}

#[tokio::test]
async fn method_rule_wins_over_url_only_rule() {
    let (session, driver) = start();
    session
        .register_mock("/users", MockOptions::new().with_body("any"))
        .unwrap();
    let get_only = session
        .register_mock("/users", MockOptions::new().with_method("GET").with_body("get"))
        .unwrap();

    let id = driver.dispatch(get("http://h/users"));
    let response = driver.wait_for_fulfillment(&id).await.unwrap();
    assert_eq!(response.body.as_deref(), Some("get"));

    let id = driver.dispatch(RequestDescriptor::new("DELETE", "http://h/users"));
    let response = driver.wait_for_fulfillment(&id).await.unwrap();
    assert_eq!(response.body.as_deref(), Some("any"));

    session.filter().method("DELETE").mocked(true).await.unwrap();
    get_only.called_times(Times::exactly(1)).unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn manual_mock_holds_until_triggered() {
    let (session, driver) = start();
    let slow = session
        .register_mock("/slow", MockOptions::new().manual().with_body("done"))
        .unwrap();

    let id = driver.dispatch(get("http://h/slow"));
    let held = netmock::wait::wait_for_some(
        || {
            let pending = slow.rule().pending();
            async move { (pending == 1).then_some(()) }
        },
        WaitConfig::default(),
    )
    .await;
    assert!(held.is_some(), "request should be held");
    assert!(driver.calls_for(&id).is_empty(), "held request is neither fulfilled nor forwarded");
    assert!(session.log().is_empty());

    slow.trigger().await.unwrap();

    assert!(matches!(driver.calls_for(&id).as_slice(), [DriverCall::Fulfill(..)]));
    assert_eq!(slow.times_called(), 1);
    session.filter().response_body("done").await.unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn early_trigger_waits_for_the_next_request() {
    let (session, driver) = start();
    let slow = session
        .register_mock("/slow", MockOptions::new().manual())
        .unwrap();

    let trigger = {
        let slow = slow.clone();
        tokio::spawn(async move { slow.trigger().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!trigger.is_finished(), "trigger must not resolve with nothing pending");
    assert_eq!(slow.times_called(), 0);

    let id = driver.dispatch(get("http://h/slow"));
    trigger.await.unwrap().unwrap();

    assert!(driver.wait_for_fulfillment(&id).await.is_some());
    slow.called_times("once".parse().unwrap()).unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn each_trigger_releases_one_request() {
    let (session, driver) = start();
    let slow = session
        .register_mock("/slow", MockOptions::new().manual())
        .unwrap();

    let first = driver.dispatch(get("http://h/slow?n=1"));
    let second = driver.dispatch(get("http://h/slow?n=2"));

    slow.trigger().await.unwrap();
    assert!(driver.wait_for_fulfillment(&first).await.is_some());
    assert!(driver.calls_for(&second).is_empty());

    slow.trigger().await.unwrap();
    assert!(driver.wait_for_fulfillment(&second).await.is_some());
    slow.called_times(Times::exactly(2)).unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn triggering_an_auto_mock_is_a_programming_error() {
    let (session, _driver) = start();
    let api = session.register_mock("/api", MockOptions::new()).unwrap();
    assert!(matches!(api.trigger().await, Err(NetmockError::Programming(_))));
    session.close().await.unwrap();
}

#[tokio::test]
async fn delayed_mock_does_not_block_other_requests() {
    let (session, driver) = start();
    session
        .register_mock(
            "/slow",
            MockOptions::new()
                .with_delay(Duration::from_millis(300))
                .with_body("slow"),
        )
        .unwrap();

    let slow = driver.dispatch(get("http://h/slow"));
    let fast = driver.dispatch(get("http://h/fast"));
    driver
        .wait_for_call(&fast, WaitConfig::default())
        .await
        .expect("unmatched request forwarded");
    driver.respond(&fast, ObservedResponse::new(200).with_body("fast"));

    session.filter().url("http://h/fast").await.unwrap();
    assert!(driver.calls_for(&slow).is_empty(), "delayed mock answered early");

    session.filter().url("http://h/slow").await.unwrap();
    let records = session.log().all();
    assert_eq!(records[0].url, "http://h/fast");
    assert_eq!(records[1].url, "http://h/slow");
    assert_eq!(records[1].sequence_index, 1);
    session.close().await.unwrap();
}

#[tokio::test]
async fn forwarded_requests_are_recorded_on_completion() {
    let (session, driver) = start();

    let ok = driver.dispatch(
        RequestDescriptor::new("POST", "http://h/api/users")
            .with_header("content-type", "application/json")
            .with_post_body(r#"{"name":"ada"}"#),
    );
    let refused = driver.dispatch(get("http://h/down"));
    assert!(driver.wait_for_call(&ok, WaitConfig::default()).await.is_some());
    assert!(driver.wait_for_call(&refused, WaitConfig::default()).await.is_some());

    driver.fail(&refused, "net::ERR_CONNECTION_REFUSED");
    driver.respond(
        &ok,
        ObservedResponse::new(201)
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"id":7}"#),
    );

    let failed = session.filter().ok(false).await.unwrap();
    let failed = failed.first().unwrap();
    assert_eq!(failed.response_status, 0);
    assert_eq!(failed.failure.as_deref(), Some("net::ERR_CONNECTION_REFUSED"));
    assert!(!failed.mocked);

    let created = session
        .filter()
        .method("post")
        .status(201)
        .post_body(json!({"name": "ada"}))
        .response_header("content-type", "application/json")
        .await
        .unwrap();
    assert!(created.first().unwrap().ok);
    assert_eq!(session.log().len(), 2);
    session.close().await.unwrap();
}

#[tokio::test]
async fn status_then_method_intersects() {
    let (session, driver) = start();

    let get_id = driver.dispatch(get("http://h/items"));
    let post_id = driver.dispatch(RequestDescriptor::new("POST", "http://h/items"));
    driver.wait_for_call(&post_id, WaitConfig::default()).await.unwrap();
    driver.respond(&get_id, ObservedResponse::new(200));
    driver.respond(&post_id, ObservedResponse::new(404));
    session.filter().status(404).await.unwrap();

    let view = session.log().view();
    assert!(view.status(200).method("POST").is_empty());
    let ok = view.status(200);
    assert_eq!(ok.len(), 1);
    assert_eq!(ok.first().unwrap().method, "GET");
    // The parent view is unchanged.
    assert_eq!(view.len(), 2);
    session.close().await.unwrap();
}

#[tokio::test]
async fn negated_and_failed_assertions() {
    let mut config = InterceptConfig::default();
    config.wait_timeout_ms = 100;
    config.poll_interval_ms = 10;
    let (session, driver) = start_with(&config);
    session.register_mock("/api", MockOptions::new()).unwrap();

    session.filter().url("http://h/api").not().unwrap();

    let id = driver.dispatch(get("http://h/api"));
    driver.wait_for_fulfillment(&id).await.unwrap();
    session.filter().url("http://h/api").await.unwrap();

    let err = session.filter().url("http://h/api").not().unwrap_err();
    assert!(err.is_assertion());

    let err = session.filter().method("PUT").await.unwrap_err();
    assert!(err.is_assertion());
    let message = err.to_string();
    assert!(message.contains(r#"method "PUT""#), "{message}");
    assert!(message.contains("1 recorded request(s) inspected"), "{message}");

    // Unrelated errors pass through inversion untouched.
    let closed: netmock::Result<()> = Err(NetmockError::SessionClosed);
    assert!(matches!(
        netmock::invert(closed, "should not matter"),
        Err(NetmockError::SessionClosed)
    ));
    session.close().await.unwrap();
}

#[tokio::test]
async fn close_discards_held_requests_and_settles_triggers() {
    let (session, driver) = start();
    let held = session
        .register_mock("/held", MockOptions::new().manual())
        .unwrap();
    let idle = session
        .register_mock("/idle", MockOptions::new().manual())
        .unwrap();

    let id = driver.dispatch(get("http://h/held"));
    netmock::wait::wait_for_some(
        || {
            let pending = held.rule().pending();
            async move { (pending == 1).then_some(()) }
        },
        WaitConfig::default(),
    )
    .await
    .expect("request held");

    let waiting = {
        let idle = idle.clone();
        tokio::spawn(async move { idle.trigger().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    session.close().await.unwrap();

    assert!(matches!(waiting.await.unwrap(), Err(NetmockError::SessionClosed)));
    assert!(matches!(held.trigger().await, Err(NetmockError::SessionClosed)));
    assert!(matches!(
        driver.wait_for_call(&id, WaitConfig::default()).await,
        Some(DriverCall::Abort(_))
    ));
    assert!(session.log().is_empty(), "discarded requests are not recorded");
    assert_eq!(held.times_called(), 0);

    assert!(matches!(
        session.register_mock("/late", MockOptions::new()),
        Err(NetmockError::SessionClosed)
    ));
    session.close().await.unwrap();
}

#[tokio::test]
async fn duplicate_registration_replaces_and_removal_forwards() {
    let (session, driver) = start();
    session
        .register_mock("/api", MockOptions::new().with_method("GET").with_status(500))
        .unwrap();
    let current = session
        .register_mock("/api", MockOptions::new().with_method("get").with_status(201))
        .unwrap();
    assert_eq!(session.registry().len(), 1);

    let id = driver.dispatch(get("http://h/api"));
    assert_eq!(driver.wait_for_fulfillment(&id).await.unwrap().status, 201);
    current.called().unwrap();

    assert_eq!(session.remove_mock("/api", None), 1);
    let id = driver.dispatch(get("http://h/api"));
    assert!(matches!(
        driver.wait_for_call(&id, WaitConfig::default()).await,
        Some(DriverCall::Continue(_))
    ));

    session
        .register_mock(UrlPattern::glob("**/assets/*").unwrap(), MockOptions::new())
        .unwrap();
    session.clear_mocks();
    assert!(session.registry().is_empty());
    session.close().await.unwrap();
}

#[tokio::test]
async fn removing_a_manual_mock_discards_its_held_requests() {
    let (session, driver) = start();
    let held = session
        .register_mock("/held", MockOptions::new().manual())
        .unwrap();
    let id = driver.dispatch(get("http://h/held"));
    netmock::wait::wait_for_some(
        || {
            let pending = held.rule().pending();
            async move { (pending == 1).then_some(()) }
        },
        WaitConfig::default(),
    )
    .await
    .expect("request held");

    session.remove_mock("/held", None);

    assert!(matches!(
        driver.wait_for_call(&id, WaitConfig::default()).await,
        Some(DriverCall::Abort(_))
    ));
    session.close().await.unwrap();
}

#[tokio::test]
async fn query_constraint_matches_decoded_parameters() {
    let (session, driver) = start();
    let search = session
        .register_mock(
            "http://h/search",
            MockOptions::new().with_query("q", "rust lang").with_body("hit"),
        )
        .unwrap();

    let url = format!("http://h/search?q={}", urlencoding::encode("rust lang"));
    let id = driver.dispatch(get(&url));
    assert_eq!(
        driver.wait_for_fulfillment(&id).await.unwrap().body.as_deref(),
        Some("hit")
    );

    let other = driver.dispatch(get("http://h/search?q=go"));
    assert!(matches!(
        driver.wait_for_call(&other, WaitConfig::default()).await,
        Some(DriverCall::Continue(_))
    ));
    search.called_times(Times::exactly(1)).unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn redirect_mock_points_at_target_with_original_query() {
    let (session, driver) = start();
    session
        .register_mock("/old", MockOptions::new().with_redirect("http://h/new"))
        .unwrap();

    let id = driver.dispatch(get("http://h/old?page=2"));
    let response = driver.wait_for_fulfillment(&id).await.unwrap();
    assert_eq!(response.status, 302);
    assert_eq!(
        response.headers.get("location").map(String::as_str),
        Some("http://h/new?page=2")
    );
    session
        .filter()
        .status(302)
        .response_header("Location", "http://h/new?page=2")
        .ok(false)
        .await
        .unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn refused_fulfillment_is_recorded_as_a_failure() {
    let (session, driver) = start();
    let api = session.register_mock("/api", MockOptions::new()).unwrap();
    driver.refuse_fulfillments(true);

    driver.dispatch(get("http://h/api"));
    let failed = session.filter().mocked(true).ok(false).await.unwrap();
    let record = failed.first().unwrap();
    assert!(record.failure.as_deref().is_some_and(|f| f.contains("target closed")));
    assert_eq!(api.times_called(), 0);
    session.close().await.unwrap();
}

#[tokio::test]
async fn manual_trigger_reports_a_refused_fulfillment() {
    let (session, driver) = start();
    let slow = session
        .register_mock("/slow", MockOptions::new().manual())
        .unwrap();
    driver.refuse_fulfillments(true);

    driver.dispatch(get("http://h/slow"));
    let err = slow.trigger().await.unwrap_err();
    assert!(matches!(err, NetmockError::Driver { operation: "fulfill", .. }));
    assert_eq!(slow.times_called(), 0);
    session.close().await.unwrap();
}

#[tokio::test]
async fn responses_for_unknown_requests_are_ignored() {
    let (session, driver) = start();
    driver.respond(&"never-dispatched".into(), ObservedResponse::new(200));

    let id = driver.dispatch(get("http://h/real"));
    driver.wait_for_call(&id, WaitConfig::default()).await.unwrap();
    driver.respond(&id, ObservedResponse::new(200));
    driver.respond(&id, ObservedResponse::new(500));

    session.filter().url("http://h/real").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.log().len(), 1);
    assert_eq!(session.log().all()[0].response_status, 200);
    session.close().await.unwrap();
}

#[tokio::test]
async fn abandoned_trigger_does_not_release_a_later_request() {
    let (session, driver) = start();
    let slow = session
        .register_mock("/slow", MockOptions::new().manual().with_body("done"))
        .unwrap();

    let gave_up = tokio::time::timeout(Duration::from_millis(20), slow.trigger()).await;
    assert!(gave_up.is_err(), "nothing was pending");

    let id = driver.dispatch(get("http://h/slow"));
    netmock::wait::wait_for_some(
        || {
            let pending = slow.rule().pending();
            async move { (pending == 1).then_some(()) }
        },
        WaitConfig::default(),
    )
    .await
    .expect("request held");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(driver.calls_for(&id).is_empty(), "request fulfilled without a live trigger");
    assert_eq!(slow.times_called(), 0);

    slow.trigger().await.unwrap();
    assert!(matches!(driver.calls_for(&id).as_slice(), [DriverCall::Fulfill(..)]));
    session.close().await.unwrap();
}

#[tokio::test]
async fn delayed_auto_mock_is_discarded_on_close() {
    let (session, driver) = start();
    session
        .register_mock(
            "/slow",
            MockOptions::new()
                .with_delay(Duration::from_millis(500))
                .with_body("late"),
        )
        .unwrap();

    let id = driver.dispatch(get("http://h/slow"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(driver.calls_for(&id).is_empty());

    session.close().await.unwrap();

    assert_eq!(driver.calls_for(&id), vec![DriverCall::Abort(id.clone())]);
    assert!(session.log().is_empty(), "discarded requests are not recorded");
    assert!(driver.is_detached());
}

#[tokio::test]
async fn manual_delay_runs_after_the_trigger() {
    let (session, driver) = start();
    let slow = session
        .register_mock(
            "/slow",
            MockOptions::new()
                .manual()
                .with_delay(Duration::from_millis(300))
                .with_body("late"),
        )
        .unwrap();

    let id = driver.dispatch(get("http://h/slow"));
    netmock::wait::wait_for_some(
        || {
            let pending = slow.rule().pending();
            async move { (pending == 1).then_some(()) }
        },
        WaitConfig::default(),
    )
    .await
    .expect("request held");

    let triggered_at = tokio::time::Instant::now();
    let trigger = {
        let slow = slow.clone();
        tokio::spawn(async move { slow.trigger().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(driver.calls_for(&id).is_empty(), "fulfilled before the delay elapsed");

    trigger.await.unwrap().unwrap();
    assert!(triggered_at.elapsed() >= Duration::from_millis(300));
    assert!(matches!(driver.calls_for(&id).as_slice(), [DriverCall::Fulfill(..)]));
    session.close().await.unwrap();
}
