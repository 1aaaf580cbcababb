//! Sessions of several roots, as a Splash process tree would set them up.

#![cfg(feature = "net")]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use splash::net::Link;
use splash::prelude::*;
use tempfile::TempDir;

fn config(dir: &TempDir) -> LinkConfig {
    LinkConfig::default()
        .socket_dir(dir.path())
        .connect_delay(Duration::from_millis(1))
}

fn root(name: &str) -> Arc<RootObject> {
    let root = RootObject::new(name);
    root.register_kind(
        ObjectKind::new("camera")
            .category(Category::Misc)
            .priority(Priority::Camera),
    );
    root
}

/// Record every serialized object the root receives without a buffer object.
fn capture(root: &RootObject) -> Arc<Mutex<Vec<SerializedObject>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    root.set_serialized_object_handler(move |_, object| {
        sink.lock().push(object);
        true
    });
    received
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn local_updates_stay_local() {
    let dir = TempDir::new().unwrap();
    let a = root("a");
    let b = root("b");
    let link = Link::attach(&a, config(&dir)).unwrap();
    link.connect_to_peer("b", &b);

    a.create_object("camera", "camFoo").unwrap();
    b.create_object("camera", "camFoo").unwrap();

    assert_eq!(
        a.set_attribute("camFoo", "exposure", &values![3.5]),
        Ok(SetAttrStatus::Created)
    );
    assert_eq!(a.get_attribute("camFoo", "exposure"), Some(values![3.5]));
    assert_eq!(b.get_attribute("camFoo", "exposure"), None);

    assert!(a.send_message("camFoo", "exposure", &values![3.5]));
    assert_eq!(b.get_attribute("camFoo", "exposure"), Some(values![3.5]));
}

#[test]
fn single_inner_consumer_shares_the_buffer() {
    let dir = TempDir::new().unwrap();
    let world = root("world");
    let mirror = root("mirror");
    let link = Link::attach(&world, config(&dir)).unwrap();
    link.connect_to_peer("mirror", &mirror);
    let received = capture(&mirror);

    let blob = SerializedObject::from_vec(vec![1; 1024]);
    assert!(world.send_buffer("mesh", blob.clone()));

    let received = received.lock();
    assert_eq!(received.len(), 1);
    assert!(received[0].shares_memory_with(&blob));
}

#[test]
fn inner_and_outer_consumers_get_their_own_copies() {
    let dir = TempDir::new().unwrap();
    let world = root("world");
    let mirror = root("mirror");
    let scene = root("scene");
    let world_link = Link::attach(&world, config(&dir)).unwrap();
    let _scene_link = Link::attach(&scene, config(&dir)).unwrap();
    world_link.connect_to_peer("mirror", &mirror);
    world_link.connect_to("scene");
    let in_mirror = capture(&mirror);
    let in_scene = capture(&scene);

    let blob = SerializedObject::from_vec((0..4096).map(|i| i as u8).collect());
    assert!(world.send_buffer("mesh", blob.clone()));
    assert!(world_link.wait_for_buffer_sending(Duration::from_secs(5)));

    {
        let received = in_mirror.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], blob);
        assert!(!received[0].shares_memory_with(&blob));
    }
    assert!(wait_for(|| in_scene.lock().len() == 1));
    assert_eq!(in_scene.lock()[0], blob);
}

#[test]
fn broadcast_reaches_every_root() {
    let dir = TempDir::new().unwrap();
    let world = root("world");
    let link = Link::attach(&world, config(&dir)).unwrap();

    let scenes: Vec<_> = ["local", "second", "third"].iter().map(|name| root(name)).collect();
    let links: Vec<_> = scenes
        .iter()
        .map(|scene| Link::attach(scene, config(&dir)).unwrap())
        .collect();
    for scene in &scenes {
        link.connect_to(scene.name());
    }
    assert_eq!(link.connected_peers(), vec!["local", "second", "third"]);

    assert!(world.send_message(ALL_PEERS, "swapInterval", &values![1]));
    for scene in &scenes {
        assert!(wait_for(|| {
            scene.get_attribute(scene.name(), "swapInterval") == Some(values![1])
        }));
    }
    drop(links);
}
