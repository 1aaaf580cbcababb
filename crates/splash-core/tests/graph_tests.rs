//! Object graph behavior across roots, without a wire transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use splash_core::{
    values, BlobObject, BufferObject, Category, LinkPeer, ManualClock, ObjectKind, Priority,
    RootObject, SerializedObject, SetAttrStatus, Transport, Value, ValueType, ALL_PEERS,
};

/// Delivers everything synchronously to another root in the same process.
struct DirectTransport {
    peers: Mutex<Vec<Weak<dyn LinkPeer>>>,
}

impl DirectTransport {
    fn to(peer: &Arc<RootObject>) -> Arc<Self> {
        let weak: Weak<RootObject> = Arc::downgrade(peer);
        let peer: Weak<dyn LinkPeer> = weak;
        Arc::new(Self {
            peers: Mutex::new(vec![peer]),
        })
    }
}

impl Transport for DirectTransport {
    fn send_message(&self, target: &str, attribute: &str, values: &[Value]) -> bool {
        for peer in self.peers.lock().iter().filter_map(Weak::upgrade) {
            peer.set(target, attribute, values, false);
        }
        true
    }

    fn send_buffer(&self, target: &str, buffer: SerializedObject) -> bool {
        for peer in self.peers.lock().iter().filter_map(Weak::upgrade) {
            peer.set_from_serialized_object(target, buffer.clone());
        }
        true
    }
}

fn register_kinds(root: &RootObject) {
    root.register_kind(
        ObjectKind::new("camera")
            .priority(Priority::Camera)
            .on_create(|camera| {
                let attribute = camera.add_attribute(
                    "size",
                    |args| args[0].as_i64().is_some_and(|w| w > 0),
                    vec![ValueType::Integer, ValueType::Integer],
                );
                attribute.set_description("Render size");
            }),
    );
    root.register_kind(
        ObjectKind::new("image")
            .category(Category::Image)
            .priority(Priority::Media)
            .with_buffer(|clock| Arc::new(BlobObject::with_clock(clock))),
    );
}

fn world_and_scene() -> (Arc<RootObject>, Arc<RootObject>) {
    let world = RootObject::new("world");
    let scene = RootObject::new("scene");
    register_kinds(&world);
    register_kinds(&scene);
    world.attach_transport(DirectTransport::to(&scene));
    scene.attach_transport(DirectTransport::to(&world));
    (world, scene)
}

#[test]
fn local_set_does_not_propagate() {
    let (world, scene) = world_and_scene();
    world.create_object("camera", "camFoo").unwrap();
    scene.create_object("camera", "camFoo").unwrap();

    let status = world.set_attribute("camFoo", "exposure", &values![3.5]).unwrap();
    assert_eq!(status, SetAttrStatus::Created);
    assert_eq!(world.get_attribute("camFoo", "exposure"), Some(values![3.5]));
    assert_eq!(scene.get_attribute("camFoo", "exposure"), None);
}

#[test]
fn explicit_send_reaches_peer() {
    let (world, scene) = world_and_scene();
    scene.create_object("camera", "cam").unwrap();

    assert!(world.send_message("cam", "size", &values![1920, 1080]));
    assert_eq!(scene.get_attribute("cam", "size"), Some(Vec::new()));
    assert!(scene.get_object("cam").unwrap().was_updated());

    assert!(world.send_message(ALL_PEERS, "clearColor", &values![0.0, 0.0, 0.0, 1.0]));
    assert_eq!(
        scene.get_attribute("scene", "clearColor"),
        Some(values![0.0, 0.0, 0.0, 1.0])
    );
}

#[test]
fn buffers_cross_roots() {
    let (world, scene) = world_and_scene();
    let source = world.create_object("image", "frame").unwrap();
    let mirror = scene.create_object("image", "frame").unwrap();
    mirror.set_not_updated();

    source
        .buffer()
        .unwrap()
        .set_serialized_object(SerializedObject::from_vec(vec![7; 32]));
    source.buffer().unwrap().deserialize_staged();

    assert!(world.send_buffer_object("frame"));
    assert!(mirror.was_updated());
    assert_eq!(mirror.buffer().unwrap().serialize().len(), 32);
    assert!(scene.wait_signal_buffer_object_updated(Duration::from_millis(100)));
}

#[test]
fn answer_round_trip_between_roots() {
    let (world, scene) = world_and_scene();
    let weak = Arc::downgrade(&scene);
    scene.add_attribute(
        "ping",
        move |args| {
            let Some(scene) = weak.upgrade() else {
                return false;
            };
            scene.answer_message("world", "ping", &[Value::from(args.len() as i64)])
        },
        vec![],
    );

    let answer =
        world.send_message_with_answer(ALL_PEERS, "ping", &values![1, 2, 3], Duration::from_secs(1));
    assert_eq!(answer, Some(values![3]));
}

#[test]
fn callbacks_follow_handle_lifetime() {
    let (world, _scene) = world_and_scene();
    world.create_object("camera", "cam").unwrap();
    let fired = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let fired = fired.clone();
            world.register_callback("cam", "size", move |_, _| {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    world.set("cam", "size", &values![0, 0], false);
    assert_eq!(fired.load(Ordering::SeqCst), 3);

    let mut handles = handles;
    handles.pop();
    world.set("cam", "size", &values![10, 10], false);
    assert_eq!(fired.load(Ordering::SeqCst), 5);

    world.dispose_object("cam");
    world.run_tasks();
    drop(handles);
}

#[test]
fn periodic_tasks_follow_the_clock() {
    let clock = Arc::new(ManualClock::new(0));
    let root = RootObject::with_clock("world", clock.clone());
    let ticks = Arc::new(AtomicUsize::new(0));

    let t = ticks.clone();
    assert!(root.add_periodic_task("swap", 16, move || {
        t.fetch_add(1, Ordering::SeqCst);
    }));

    root.run_tasks();
    clock.advance_ms(10);
    root.run_tasks();
    clock.advance_ms(10);
    root.run_tasks();
    assert_eq!(ticks.load(Ordering::SeqCst), 2);

    assert!(root.remove_periodic_task("swap"));
    clock.advance_ms(100);
    root.run_tasks();
    assert_eq!(ticks.load(Ordering::SeqCst), 2);
}

#[test]
fn receive_thread_and_main_thread_share_objects() {
    let (world, scene) = world_and_scene();
    scene.create_object("camera", "cam").unwrap();

    let sender = {
        let world = world.clone();
        thread::spawn(move || {
            for i in 0..200 {
                world.send_message("cam", "frame", &values![i]);
            }
        })
    };
    for _ in 0..200 {
        scene.run_tasks();
        scene.get_attribute("cam", "frame");
    }
    sender.join().unwrap();
    assert_eq!(scene.get_attribute("cam", "frame"), Some(values![199]));
}
