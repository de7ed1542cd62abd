mod common;

use bpmn_stream_core::record::*;
use bpmn_stream_core::{Clock, NO_KEY};
use common::{Engine, START_TIME};
use serde_json::json;
use std::time::Duration;

const WAIT: &str = r#"
id: wait
nodes:
  - kind: StartEvent
    id: start
  - kind: TimerCatch
    id: pause
    timer: PT5S
  - kind: EndEvent
    id: end
edges:
  - from: start
    to: pause
  - from: pause
    to: end
"#;

const IMMEDIATE: &str = r#"
id: immediate
nodes:
  - kind: StartEvent
    id: start
  - kind: TimerCatch
    id: now
    timer: PT0S
  - kind: TimerCatch
    id: overdue
    timer: -PT1S
  - kind: EndEvent
    id: end
edges:
  - from: start
    to: now
  - from: now
    to: overdue
  - from: overdue
    to: end
"#;

const REMINDERS: &str = r#"
id: reminders
nodes:
  - kind: StartEvent
    id: start
  - kind: ServiceTask
    id: review
    job_type: review-document
  - kind: TimerBoundary
    id: remind
    attached_to: review
    timer: R2/PT1S
    cancel_activity: false
  - kind: EndEvent
    id: reminded
  - kind: EndEvent
    id: done
edges:
  - from: start
    to: review
  - from: review
    to: done
  - from: remind
    to: reminded
"#;

const DEADLINE: &str = r#"
id: deadline
nodes:
  - kind: StartEvent
    id: start
  - kind: ServiceTask
    id: review
    job_type: review-document
  - kind: TimerBoundary
    id: expire
    attached_to: review
    timer: PT10S
  - kind: EndEvent
    id: expired
  - kind: EndEvent
    id: done
edges:
  - from: start
    to: review
  - from: review
    to: done
  - from: expire
    to: expired
"#;

const RACE: &str = r#"
id: race
nodes:
  - kind: StartEvent
    id: start
  - kind: EventBasedGateway
    id: gw
  - kind: TimerCatch
    id: fast
    timer: PT1S
  - kind: TimerCatch
    id: slow
    timer: PT2S
  - kind: EndEvent
    id: fast_end
  - kind: EndEvent
    id: slow_end
edges:
  - from: start
    to: gw
  - from: gw
    to: fast
  - from: gw
    to: slow
  - from: fast
    to: fast_end
  - from: slow
    to: slow_end
"#;

fn process_value(bpmn_process_id: &str, process_instance_key: i64) -> ProcessInstanceRecord {
    ProcessInstanceRecord {
        bpmn_process_id: bpmn_process_id.to_string(),
        process_instance_key,
        element_id: bpmn_process_id.to_string(),
        bpmn_element_type: BpmnElementType::Process,
        flow_scope_key: NO_KEY,
    }
}

#[tokio::test]
async fn test_catch_event_waits_for_due_date() {
    let engine = Engine::start(&[WAIT]);
    let pik = engine.create_instance("wait", json!({})).await;

    let created = engine.timer_events("pause");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0, TimerIntent::Created);
    assert_eq!(created[0].2, START_TIME + 5_000);

    assert_eq!(engine.advance_and_fire(Duration::from_millis(4_999)).await, 0);
    assert!(!engine.process_completed(pik));

    assert_eq!(engine.advance_and_fire(Duration::from_millis(1)).await, 1);
    assert_eq!(engine.count_events(TimerIntent::Triggered, "pause"), 1);
    assert!(engine.process_completed(pik));
    engine.close().await;
}

#[tokio::test]
async fn test_cycle_boundary_fires_each_repetition() {
    let engine = Engine::start(&[REMINDERS]);
    let pik = engine.create_instance("reminders", json!({})).await;

    assert_eq!(engine.advance_and_fire(Duration::from_secs(1)).await, 1);
    assert_eq!(engine.advance_and_fire(Duration::from_secs(1)).await, 1);
    // R2 is exhausted
    assert_eq!(engine.advance_and_fire(Duration::from_secs(1)).await, 0);

    let timeline: Vec<_> = engine
        .timer_events("remind")
        .into_iter()
        .map(|(intent, _, due)| (intent, due - START_TIME))
        .collect();
    assert_eq!(
        timeline,
        vec![
            (TimerIntent::Created, 1_000),
            (TimerIntent::Triggered, 1_000),
            (TimerIntent::Created, 2_000),
            (TimerIntent::Triggered, 2_000),
        ]
    );
    assert_eq!(
        engine.count_events(ProcessInstanceIntent::ElementCompleted, "reminded"),
        2
    );

    // the host task is untouched by a non-interrupting boundary
    let jobs = engine.open_jobs("review");
    assert_eq!(jobs.len(), 1);
    engine.complete_job(jobs[0], json!({ "approved": true })).await;
    assert!(engine.process_completed(pik));
    engine.close().await;
}

#[tokio::test]
async fn test_interrupting_boundary_terminates_host() {
    let engine = Engine::start(&[DEADLINE]);
    let pik = engine.create_instance("deadline", json!({})).await;
    let job = engine.open_jobs("review")[0];

    assert_eq!(engine.advance_and_fire(Duration::from_secs(10)).await, 1);

    assert_eq!(
        engine.element_intents("review"),
        vec![
            ProcessInstanceIntent::ElementActivating,
            ProcessInstanceIntent::ElementActivated,
            ProcessInstanceIntent::ElementTerminating,
            ProcessInstanceIntent::ElementTerminated,
        ]
    );
    assert!(engine.events().iter().any(|r| {
        r.key == job && r.intent == Intent::Job(JobIntent::Canceled)
    }));
    assert_eq!(
        engine.count_events(ProcessInstanceIntent::ElementCompleted, "expired"),
        1
    );
    assert!(engine.element_intents("done").is_empty());
    assert!(engine.process_completed(pik));
    engine.close().await;
}

#[tokio::test]
async fn test_completing_host_cancels_boundary_timer() {
    let engine = Engine::start(&[DEADLINE]);
    let pik = engine.create_instance("deadline", json!({})).await;
    let job = engine.open_jobs("review")[0];

    engine.complete_job(job, json!({})).await;
    assert!(engine.process_completed(pik));
    assert_eq!(engine.count_events(TimerIntent::Canceled, "expire"), 1);

    assert_eq!(engine.advance_and_fire(Duration::from_secs(10)).await, 0);
    assert_eq!(engine.count_events(TimerIntent::Triggered, "expire"), 0);
    engine.close().await;
}

#[tokio::test]
async fn test_event_based_gateway_first_timer_wins() {
    let engine = Engine::start(&[RACE]);
    let pik = engine.create_instance("race", json!({})).await;

    assert_eq!(engine.count_events(TimerIntent::Created, "fast"), 1);
    assert_eq!(engine.count_events(TimerIntent::Created, "slow"), 1);
    assert_eq!(
        engine.element_intents("gw"),
        vec![
            ProcessInstanceIntent::ElementActivating,
            ProcessInstanceIntent::ElementActivated,
        ]
    );

    assert_eq!(engine.advance_and_fire(Duration::from_secs(1)).await, 1);
    assert_eq!(engine.count_events(TimerIntent::Canceled, "slow"), 1);
    assert_eq!(
        engine.element_intents("gw"),
        vec![
            ProcessInstanceIntent::ElementActivating,
            ProcessInstanceIntent::ElementActivated,
            ProcessInstanceIntent::ElementCompleting,
            ProcessInstanceIntent::ElementCompleted,
        ]
    );
    assert_eq!(
        engine.count_events(ProcessInstanceIntent::ElementCompleted, "fast_end"),
        1
    );

    assert_eq!(engine.advance_and_fire(Duration::from_secs(1)).await, 0);
    assert_eq!(engine.count_events(TimerIntent::Triggered, "slow"), 0);
    assert!(engine.element_intents("slow").is_empty());
    // the gateway itself never takes a sequence flow to its catch events
    assert!(engine.taken_flows().iter().all(|flow| !flow.starts_with("gw->")));
    assert!(engine.process_completed(pik));
    engine.close().await;
}

#[tokio::test]
async fn test_cancel_process_cancels_open_timer() {
    let engine = Engine::start(&[WAIT]);
    let pik = engine.create_instance("wait", json!({})).await;

    engine
        .command(pik, ProcessInstanceIntent::Cancel, process_value("wait", pik))
        .await;

    assert_eq!(engine.count_events(TimerIntent::Canceled, "pause"), 1);
    assert!(engine.process_terminated(pik));
    assert_eq!(
        engine.element_intents("pause"),
        vec![
            ProcessInstanceIntent::ElementActivating,
            ProcessInstanceIntent::ElementActivated,
            ProcessInstanceIntent::ElementTerminating,
            ProcessInstanceIntent::ElementTerminated,
        ]
    );

    assert_eq!(engine.advance_and_fire(Duration::from_secs(5)).await, 0);
    engine.close().await;
}

#[tokio::test]
async fn test_timer_cancel_is_rejected_the_second_time() {
    let engine = Engine::start(&[WAIT]);
    engine.create_instance("wait", json!({})).await;
    let (_, timer_key, _) = engine.timer_events("pause")[0];
    let timer = engine
        .events()
        .into_iter()
        .find(|r| r.key == timer_key)
        .and_then(|r| r.as_timer().cloned())
        .expect("timer created");

    engine
        .command(timer_key, TimerIntent::Cancel, timer.clone())
        .await;
    engine.command(timer_key, TimerIntent::Cancel, timer).await;

    assert_eq!(engine.count_events(TimerIntent::Canceled, "pause"), 1);
    let rejections = engine.rejections();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].rejection_type, Some(RejectionType::NotFound));
    engine.close().await;
}

#[tokio::test]
async fn test_cancel_after_trigger_is_rejected() {
    let engine = Engine::start(&[WAIT]);
    let pik = engine.create_instance("wait", json!({})).await;
    let (_, timer_key, _) = engine.timer_events("pause")[0];
    let timer = engine
        .events()
        .into_iter()
        .find(|r| r.key == timer_key)
        .and_then(|r| r.as_timer().cloned())
        .expect("timer created");

    assert_eq!(engine.advance_and_fire(Duration::from_secs(5)).await, 1);
    assert!(engine.process_completed(pik));

    engine.command(timer_key, TimerIntent::Cancel, timer).await;

    let rejections = engine.rejections();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].key, timer_key);
    assert_eq!(rejections[0].rejection_type, Some(RejectionType::NotFound));
    assert_eq!(engine.count_events(TimerIntent::Canceled, "pause"), 0);
    engine.close().await;
}

#[tokio::test]
async fn test_zero_and_negative_durations_fire_without_clock_advance() {
    let engine = Engine::start(&[IMMEDIATE]);
    let pik = engine.create_instance("immediate", json!({})).await;

    let created = engine.timer_events("now");
    assert_eq!(created, vec![(TimerIntent::Created, created[0].1, START_TIME)]);
    assert!(!engine.process_completed(pik));

    // the clock stays at START_TIME throughout
    assert_eq!(engine.advance_and_fire(Duration::ZERO).await, 1);
    assert_eq!(engine.count_events(TimerIntent::Triggered, "now"), 1);

    let overdue = engine.timer_events("overdue");
    assert_eq!(overdue[0].0, TimerIntent::Created);
    assert_eq!(overdue[0].2, START_TIME - 1_000);
    assert_eq!(engine.advance_and_fire(Duration::ZERO).await, 1);
    assert_eq!(engine.count_events(TimerIntent::Triggered, "overdue"), 1);

    assert!(engine.process_completed(pik));
    assert_eq!(engine.clock.now(), START_TIME);
    engine.close().await;
}
