use std::time::Duration;

use tent_view::{
    EventKind,
    data_structures::scene_graph::{NodeRole, SceneRoot},
    events::EventScheduler,
};

const FRAME: Duration = Duration::from_millis(16);

fn run(events: &mut EventScheduler, scene: &mut SceneRoot, from: Duration, to: Duration) -> Duration {
    let mut now = from;
    while now < to {
        now += FRAME;
        events.tick(now, FRAME, scene);
    }
    now
}

#[test]
fn double_trigger_keeps_one_instance_and_cleans_once() {
    for kind in EventKind::ALL {
        let mut scene = SceneRoot::new();
        let mut events = EventScheduler::new(7);

        assert!(events.trigger(kind, Duration::ZERO, &mut scene));
        let now = run(&mut events, &mut scene, Duration::ZERO, kind.duration() / 2);
        assert!(!events.trigger(kind, now, &mut scene));
        assert_eq!(scene.ids_with_role(NodeRole::Event(kind)).len(), 1);
        assert_eq!(events.active_kinds(), vec![kind]);

        let end = kind.duration() + FRAME;
        run(&mut events, &mut scene, now, end);
        assert!(!events.is_active(kind));
        assert!(scene.ids_with_role(NodeRole::Event(kind)).is_empty());
        assert!(scene.is_empty());
        assert!(scene.pool().is_empty());
        assert_eq!(events.cleanup_count(kind), 1, "{kind}");
    }
}

#[test]
fn the_expiry_is_measured_from_the_first_trigger() {
    let mut scene = SceneRoot::new();
    let mut events = EventScheduler::new(1);
    events.trigger(EventKind::ShootingStar, Duration::ZERO, &mut scene);
    let now = run(&mut events, &mut scene, Duration::ZERO, Duration::from_secs(2));
    events.trigger(EventKind::ShootingStar, now, &mut scene);

    let now = run(&mut events, &mut scene, now, Duration::from_millis(3100));
    assert!(!events.is_active(EventKind::ShootingStar));
    run(&mut events, &mut scene, now, Duration::from_secs(6));
    assert_eq!(events.cleanup_count(EventKind::ShootingStar), 1);
}

#[test]
fn an_event_can_run_again_after_it_ended() {
    let mut scene = SceneRoot::new();
    let mut events = EventScheduler::new(2);
    events.trigger(EventKind::UfoFlash, Duration::ZERO, &mut scene);
    let now = run(&mut events, &mut scene, Duration::ZERO, Duration::from_millis(5100));
    assert!(events.trigger(EventKind::UfoFlash, now, &mut scene));
    assert_eq!(events.cleanup_count(EventKind::UfoFlash), 1);
    run(&mut events, &mut scene, now, now + Duration::from_millis(5100));
    assert_eq!(events.cleanup_count(EventKind::UfoFlash), 2);
}

#[test]
fn different_kinds_run_side_by_side() {
    let mut scene = SceneRoot::new();
    let mut events = EventScheduler::new(4);
    assert!(events.trigger(EventKind::Deer, Duration::ZERO, &mut scene));
    assert!(events.trigger(EventKind::BirdFlyby, Duration::ZERO, &mut scene));
    let now = run(&mut events, &mut scene, Duration::ZERO, Duration::from_millis(8100));
    assert_eq!(events.active_kinds(), vec![EventKind::Deer]);
    run(&mut events, &mut scene, now, Duration::from_millis(10_100));
    assert!(events.active_kinds().is_empty());
}

#[test]
fn the_deer_walks_across() {
    let mut scene = SceneRoot::new();
    let mut events = EventScheduler::new(5);
    events.trigger(EventKind::Deer, Duration::ZERO, &mut scene);
    let id = events.node(EventKind::Deer).unwrap();
    let start = scene.get(id).unwrap().get_local_transform(0).unwrap().position.x;
    run(&mut events, &mut scene, Duration::ZERO, Duration::from_secs(5));
    let later = scene.get(id).unwrap().get_local_transform(0).unwrap().position.x;
    assert!(later < start - 5.0);
}

#[test]
fn random_triggers_pick_known_kinds() {
    let mut scene = SceneRoot::new();
    let mut events = EventScheduler::new(11);
    let mut started = Vec::new();
    for _ in 0..32 {
        started.extend(events.trigger_random(Duration::ZERO, &mut scene));
    }
    assert!(!started.is_empty());
    assert!(started.len() <= EventKind::ALL.len());
    assert_eq!(scene.len(), started.len());
}

#[test]
fn names_parse_like_commands() {
    assert_eq!("Deer".parse::<EventKind>(), Ok(EventKind::Deer));
    assert_eq!("shooting_star".parse::<EventKind>(), Ok(EventKind::ShootingStar));
    assert!("meteor".parse::<EventKind>().is_err());
}
