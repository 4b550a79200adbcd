use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shm_segment::{Facility, MemorySegments, Segment, SegmentError};

use crate::{
    lock, slots, Encoded, Error, Item, Kind, LockPolicy, Namespace, NamespaceOptions, Scalar,
    ShDict, ShList, Value,
};

fn with_setup(policy: LockPolicy) -> (MemorySegments, Namespace) {
    let segments = MemorySegments::new();
    let options = NamespaceOptions {
        lock: policy,
        ..NamespaceOptions::default()
    };

    (segments.clone(), Namespace::new(segments, options))
}

fn setup() -> (MemorySegments, Namespace) {
    with_setup(LockPolicy::default())
}

/// Give up fast, for tests that expect a timeout.
fn impatient() -> LockPolicy {
    LockPolicy {
        attempts: 3,
        interval: Duration::from_millis(1),
    }
}

fn map<V: Into<Value>>(
    pairs: impl IntoIterator<Item = (&'static str, V)>,
) -> BTreeMap<String, Value> {
    pairs
        .into_iter()
        .map(|(key, val)| (key.to_owned(), val.into()))
        .collect()
}

fn string(st: &str) -> Scalar {
    Scalar::Str(st.to_owned())
}

#[test]
fn foo_scenario() {
    let (_, ns) = setup();

    let mut foo = ShDict::create(&ns, "foo", BTreeMap::new()).unwrap();
    assert!(foo.get_item("aaa").unwrap_err().is_key_not_found());

    let mut foo = ShDict::create(&ns, "foo", map([("aaa", "bbb")])).unwrap();
    assert_eq!(foo.get_item("aaa").unwrap().as_scalar(), Some(&string("bbb")));

    let data = map([("aaa", Value::list(["bbb", "ddd"]))]);
    let mut foo = ShDict::create(&ns, "foo", data).unwrap();
    let mut aaa = foo.get_item("aaa").unwrap().into_list().unwrap();
    assert_eq!(aaa.get_item(0).unwrap().as_scalar(), Some(&string("bbb")));

    let elements: HashSet<String> = aaa
        .iter()
        .unwrap()
        .map(|item| match item.unwrap() {
            Item::Scalar(Scalar::Str(st)) => st,
            _ => panic!("expected a string element"),
        })
        .collect();
    assert_eq!(elements, HashSet::from(["bbb".to_owned(), "ddd".to_owned()]));

    aaa.append(Value::dict([("dir", Value::from(1)), ("rate", Value::from(12.2))]))
        .unwrap();

    // Visible through a fresh read of the parent.
    let mut aaa = foo.get_item("aaa").unwrap().into_list().unwrap();
    let third = aaa.get_item(2).unwrap().into_dict().unwrap().to_map().unwrap();
    assert_eq!(third, map([("dir", Value::from(1)), ("rate", Value::from(12.2))]));
}

#[test]
fn scalars_round_trip() {
    let (_, ns) = setup();
    let mut dict = ShDict::open(&ns, "scalars").unwrap();

    let values = [
        Scalar::None,
        Scalar::Bool(true),
        Scalar::Int(-42),
        Scalar::Float(0.5),
        string("Hello, world!"),
        Scalar::Bytes(vec![0, 255, 7]),
    ];

    for (idx, scalar) in values.iter().enumerate() {
        dict.set(format!("k{idx}"), scalar.clone()).unwrap();
    }

    for (idx, scalar) in values.iter().enumerate() {
        let item = dict.get_item(&format!("k{idx}")).unwrap();
        assert_eq!(item.as_scalar(), Some(scalar));
    }
}

#[test]
fn nested_round_trip() {
    let (_, ns) = setup();
    let mut dict = ShDict::open(&ns, "nested").unwrap();

    let value = Value::dict([
        ("name", Value::from("probe")),
        (
            "samples",
            Value::list([
                Value::from(1),
                Value::list([Value::from(2.5), Value::from(None::<i64>)]),
                Value::dict([("deep", Value::dict([("deeper", true)]))]),
            ]),
        ),
    ]);

    dict.set("v", value.clone()).unwrap();
    let read = dict.get("v").unwrap().expect("was just set");
    assert_eq!(read.kind(), Some(Kind::Dict));
    assert_eq!(read.into_value().unwrap(), value);

    // Opened by another process by name only.
    let mut other = ShDict::open(&ns, "nested").unwrap();
    assert_eq!(other.to_map().unwrap(), map([("v", value)]));
}

#[test]
fn keys_stay_unique() {
    let (_, ns) = setup();
    let mut dict = ShDict::open(&ns, "unique").unwrap();

    dict.set("a", 1).unwrap();
    dict.set("a", 2).unwrap();
    dict.set("b", 3).unwrap();
    // Removing and setting again moves the key to the end.
    assert!(dict.delete("a").unwrap());
    dict.set("a", 4).unwrap();
    dict.set("b", 5).unwrap();
    assert!(!dict.delete("missing").unwrap());

    let keys = dict.keys().unwrap();
    assert_eq!(keys, ["b", "a"]);
    assert_eq!(dict.get_item("a").unwrap().as_scalar(), Some(&Scalar::Int(4)));
    assert_eq!(dict.get_item("b").unwrap().as_scalar(), Some(&Scalar::Int(5)));
    assert_eq!(dict.len().unwrap(), 2);
}

#[test]
fn value_segments_follow_keys() {
    let (_, ns) = setup();
    let mut dict = ShDict::create(&ns, "follow", map([("x", 1), ("y", 2)])).unwrap();

    dict.delete("x").unwrap();
    dict.set("z", 3).unwrap();

    let values: Vec<String> = ns
        .segments()
        .unwrap()
        .into_iter()
        .filter(|name| name.starts_with("follow_val_"))
        .collect();
    assert_eq!(values, ["follow_val_y", "follow_val_z"]);
    assert!(!ns.segments().unwrap().contains(&"follow_lock".to_owned()));
}

#[test]
fn dict_create_sorts_keys() {
    let (_, ns) = setup();
    let mut dict = ShDict::create(&ns, "sorted", map([("b", 2), ("c", 3), ("a", 1)])).unwrap();
    dict.set("0", 0).unwrap();

    let keys: Vec<String> = dict.items().unwrap().map(|entry| entry.unwrap().0).collect();
    assert_eq!(keys, ["a", "b", "c", "0"]);
}

#[test]
fn append_is_contiguous() {
    let (_, ns) = setup();
    let mut list = ShList::create(&ns, "appended", vec![]).unwrap();
    assert!(list.is_empty().unwrap());

    for idx in 0..10 {
        list.append(idx).unwrap();
    }

    assert_eq!(list.len().unwrap(), 10);
    let values = list.to_values().unwrap();
    assert_eq!(values, (0..10).map(Value::from).collect::<Vec<_>>());

    // Restartable, and each call of `iter` sees the current length.
    let mut other = ShList::open(&ns, "appended").unwrap();
    other.append("last").unwrap();
    assert_eq!(list.iter().unwrap().count(), 11);
    assert!(list.get_item(11).unwrap_err().is_key_not_found());
}

#[test]
fn overwrite_clears_state() {
    let (_, ns) = setup();
    let mut dict = ShDict::create(
        &ns,
        "foo",
        map([("aaa", Value::list(["bbb", "ddd"])), ("ccc", Value::from(1))]),
    )
    .unwrap();
    assert_eq!(dict.len().unwrap(), 2);
    assert!(ns.segments().unwrap().len() > 3);

    ShDict::create(&ns, "foo", BTreeMap::new()).unwrap();
    assert!(ns.segments().unwrap().is_empty());

    let mut reloaded = ShDict::open(&ns, "foo").unwrap();
    assert!(reloaded.is_empty().unwrap());
    // The old handle reloads before reading.
    assert!(dict.get_item("ccc").unwrap_err().is_key_not_found());

    let rebuilt = reloaded.reconstruct(map([("new", true)])).unwrap();
    assert_eq!(rebuilt.name(), "foo");
    assert_eq!(reloaded.keys().unwrap(), ["new"]);
}

#[test]
fn setdefault_and_get() {
    let (_, ns) = setup();
    let mut dict = ShDict::open(&ns, "defaults").unwrap();

    let first = dict.setdefault("k", "first").unwrap();
    assert_eq!(first.as_scalar(), Some(&string("first")));
    let second = dict.setdefault("k", "second").unwrap();
    assert_eq!(second.as_scalar(), Some(&string("first")));

    assert!(dict.get("missing").unwrap().is_none());
    let fallback = dict.get_or("missing", Item::Scalar(Scalar::Int(7))).unwrap();
    assert_eq!(fallback.as_scalar(), Some(&Scalar::Int(7)));

    dict.update([("a", 1), ("k", 2)]).unwrap();
    assert_eq!(dict.keys().unwrap(), ["k", "a"]);
    assert!(dict.contains_key("a").unwrap());
    assert_eq!(dict.get_item("k").unwrap().as_scalar(), Some(&Scalar::Int(2)));
}

#[test]
fn held_lock_times_out() {
    let (_, ns) = with_setup(impatient());
    let mut dict = ShDict::create(&ns, "busy", map([("a", 1)])).unwrap();
    let mut list = ShList::create(&ns, "busy_list", vec![Value::from(1)]).unwrap();

    let guard = lock::lock_for_writing(&ns, "busy").unwrap();
    assert!(dict.set("b", 2).unwrap_err().is_lock_timeout());
    assert!(dict.get_item("a").unwrap_err().is_lock_timeout());
    assert!(dict.items().is_err());

    // The loser must not have removed the lock of the holder.
    assert!(!lock::can_read(&ns, "busy").unwrap());
    // Other containers are unaffected.
    list.append(2).unwrap();

    drop(guard);
    assert!(lock::can_read(&ns, "busy").unwrap());
    dict.set("b", 2).unwrap();
    assert_eq!(dict.keys().unwrap(), ["a", "b"]);
}

#[test]
fn lock_is_exclusive() {
    let (_, ns) = setup();

    assert!(lock::try_lock(&ns, "one").unwrap());
    assert!(!lock::try_lock(&ns, "one").unwrap());
    assert!(!lock::can_read(&ns, "one").unwrap());
    lock::unlock(&ns, "one").unwrap();
    lock::unlock(&ns, "one").unwrap();
    assert!(lock::can_read(&ns, "one").unwrap());

    let guard = lock::lock_for_writing(&ns, "one").unwrap();
    assert_eq!(guard.name(), "one");
    assert!(ns.segments().unwrap().contains(&lock::lock_name("one")));
    drop(guard);
    assert!(ns.segments().unwrap().is_empty());
}

#[test]
fn empty_lock_segment_admits_readers() {
    let (segments, ns) = setup();
    segments.create("sharedmem_husk_lock", &[]).unwrap();

    assert!(lock::can_read(&ns, "husk").unwrap());
    assert!(!lock::try_lock(&ns, "husk").unwrap());
}

#[test]
fn writers_exclude_each_other() {
    let policy = LockPolicy {
        attempts: 100_000,
        interval: Duration::from_micros(50),
    };
    let (_, ns) = with_setup(policy);
    ShList::create(&ns, "shared", vec![]).unwrap();

    let holders = Arc::new(AtomicUsize::new(0));
    let threads: Vec<_> = (0..4)
        .map(|thread| {
            let ns = ns.clone();
            let holders = holders.clone();
            std::thread::spawn(move || {
                let mut list = ShList::open(&ns, "shared").unwrap();
                for round in 0..20 {
                    {
                        let _guard = lock::lock_for_writing(&ns, "critical").unwrap();
                        assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                        std::thread::sleep(Duration::from_micros(20));
                        holders.fetch_sub(1, Ordering::SeqCst);
                    }

                    list.append(thread * 100 + round).unwrap();
                }
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }

    let mut list = ShList::open(&ns, "shared").unwrap();
    let values: HashSet<i64> = list
        .to_values()
        .unwrap()
        .into_iter()
        .map(|value| match value {
            Value::Scalar(Scalar::Int(i)) => i,
            other => panic!("unexpected element {other}"),
        })
        .collect();

    assert_eq!(values.len(), 80);
    assert_eq!(list.len().unwrap(), 80);
}

#[test]
fn tags_encode_references() {
    assert_eq!(
        Encoded::from_scalar(string("dict:outer_1:x")),
        Encoded::Ref(Kind::Dict, "outer_1:x".to_owned())
    );
    assert_eq!(
        Encoded::from_scalar(string("list:a")),
        Encoded::Ref(Kind::List, "a".to_owned())
    );
    assert_eq!(
        Encoded::from_scalar(string("recursive:a")),
        Encoded::Scalar(string("recursive:a"))
    );
    assert_eq!(Encoded::from_scalar(Scalar::Int(3)), Encoded::Scalar(Scalar::Int(3)));
    assert_eq!(Encoded::Ref(Kind::List, "b".into()).into_scalar(), string("list:b"));
}

#[test]
fn nested_values_are_tagged() {
    let (segments, ns) = setup();
    ShDict::create(&ns, "tagged", map([("l", Value::list([1]))])).unwrap();

    let segment = segments.open("sharedmem_tagged_val_l").unwrap();
    let [slot]: [Scalar; 1] = slots::decode(&segment).unwrap().try_into().unwrap();
    let Scalar::Str(tag) = slot else {
        panic!("reference must be a string slot");
    };

    let sub = tag.strip_prefix("list:").expect("list tag");
    assert!(sub.starts_with("tagged_"));
    assert!(ns.segments().unwrap().contains(&format!("{sub}_val_0")));
}

#[test]
fn cycles_are_detected() {
    let (segments, ns) = setup();
    let contents = slots::encode(&[string("loop")]);
    segments.create("sharedmem_loop_keys", &contents).unwrap();
    let contents = slots::encode(&[string("dict:loop")]);
    segments.create("sharedmem_loop_val_loop", &contents).unwrap();

    let mut dict = ShDict::open(&ns, "loop").unwrap();
    // Lazy reads are fine.
    let inner = dict.get_item("loop").unwrap().into_dict().unwrap();
    assert_eq!(inner.name(), "loop");

    assert!(matches!(dict.to_map(), Err(Error::Cycle(name)) if name == "loop"));
}

#[test]
fn wrong_kind_is_an_error() {
    let (_, ns) = setup();
    let mut dict = ShDict::create(&ns, "kinds", map([("s", 1)])).unwrap();

    let err = dict.get_item("s").unwrap().into_list().unwrap_err();
    assert!(matches!(err, Error::Kind { expected: Kind::List, .. }));

    assert!(matches!(ShDict::open(&ns, ""), Err(Error::InvalidName { .. })));
}

#[test]
fn corrupt_segments_are_rejected() {
    let (segments, ns) = setup();

    let keys = slots::encode(&[Scalar::Int(0)]);
    segments.create("sharedmem_typed_keys", &keys).unwrap();
    assert!(matches!(ShDict::open(&ns, "typed"), Err(Error::Corrupt { .. })));
    // The same keys are fine for a list.
    let mut list = ShList::open(&ns, "typed").unwrap();
    assert_eq!(list.len().unwrap(), 1);

    segments.create("sharedmem_typed_val_0", b"garbage").unwrap();
    assert!(matches!(list.get_item(0), Err(Error::Corrupt { .. })));
}

#[test]
fn slot_decoding_checks_bounds() {
    let good = slots::encode(&[Scalar::Int(1), string("two"), Scalar::None]);
    let decoded = slots::decode(&Segment::new("good", good.clone())).unwrap();
    assert_eq!(decoded, [Scalar::Int(1), string("two"), Scalar::None]);

    let truncated = &good[..good.len() - 2];
    let mut trailing = good.clone();
    trailing.push(0);
    let mut bad_tag = slots::encode(&[Scalar::Bool(true)]);
    bad_tag[8] = 99;
    let mut bad_bool = slots::encode(&[Scalar::Bool(true)]);
    let last = bad_bool.len() - 1;
    bad_bool[last] = 2;

    let cases: [&[u8]; 5] = [truncated, &trailing, &bad_tag, &bad_bool, b"shs"];
    for bytes in cases {
        let err = slots::decode(&Segment::new("bad", bytes.to_vec())).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }), "{err:?}");
    }
}

#[test]
fn options_from_lookup() {
    let options = NamespaceOptions::from_lookup(|_| None).unwrap();
    assert_eq!(options, NamespaceOptions::default());
    assert_eq!(options.prefix, "sharedmem_");
    assert_eq!(options.lock.attempts, 100);
    assert_eq!(options.lock.interval, Duration::from_millis(10));

    let options = NamespaceOptions::from_lookup(|var| match var {
        "SHM_DICT_PREFIX" => Some("app_".into()),
        "SHM_DICT_LOCK_ATTEMPTS" => Some("5".into()),
        "SHM_DICT_LOCK_INTERVAL_MS" => Some("2".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(options.prefix, "app_");
    assert_eq!(options.lock.attempts, 5);
    assert_eq!(options.lock.interval, Duration::from_millis(2));

    let err = NamespaceOptions::from_lookup(|var| {
        (var == "SHM_DICT_LOCK_ATTEMPTS").then(|| "many".into())
    })
    .unwrap_err();
    assert!(matches!(err, Error::Config { var: "SHM_DICT_LOCK_ATTEMPTS", .. }));
}

#[test]
fn prefixes_isolate_namespaces() {
    let segments = MemorySegments::new();
    let first = Namespace::new(segments.clone(), NamespaceOptions::default());
    let second = Namespace::new(
        segments.clone(),
        NamespaceOptions {
            prefix: "other_".to_owned(),
            ..NamespaceOptions::default()
        },
    );

    ShDict::create(&first, "same", map([("a", 1)])).unwrap();
    let mut other = ShDict::open(&second, "same").unwrap();
    assert!(other.is_empty().unwrap());
    assert!(segments.contains("sharedmem_same_keys"));
    assert!(second.segments().unwrap().is_empty());
}

#[test]
fn failed_set_keeps_previous_value() {
    let (segments, ns) = setup();
    let mut dict = ShDict::create(&ns, "keep", BTreeMap::new()).unwrap();
    dict.set("a", 1).unwrap();

    let err = dict.set("a", Value::dict([("x/y", 1)])).unwrap_err();
    assert!(matches!(err, Error::Segment(SegmentError::InvalidName { .. })), "{err:?}");

    assert_eq!(dict.keys().unwrap(), ["a"]);
    assert_eq!(dict.get_item("a").unwrap().as_scalar(), Some(&Scalar::Int(1)));
    assert_eq!(dict.to_map().unwrap()["a"].as_scalar(), Some(&Scalar::Int(1)));

    // Nothing of the nested map is left behind, and the lock is released.
    assert_eq!(ns.segments().unwrap(), ["keep_keys", "keep_val_a"]);
    assert_eq!(segments.len(), 2);
}

#[test]
fn failed_create_leaves_no_segments() {
    let (segments, ns) = setup();

    let err = ShDict::create(&ns, "orph", map([("a", 1), ("b/c", 2)])).unwrap_err();
    assert!(matches!(err, Error::Segment(SegmentError::InvalidName { .. })), "{err:?}");
    assert!(ns.segments().unwrap().is_empty());

    let data = map([("a", Value::list([1, 2])), ("b/c", Value::from(3))]);
    assert!(ShDict::create(&ns, "nest", data).is_err());
    assert!(ns.segments().unwrap().is_empty());

    let data = vec![Value::from(1), Value::dict([("x/y", 2)]), Value::from(3)];
    assert!(ShList::create(&ns, "orphans", data).is_err());
    assert!(segments.is_empty(), "{:?}", segments.list().unwrap());

    // The names are free to use afterwards.
    let mut list = ShList::create(&ns, "orphans", vec![Value::from(1)]).unwrap();
    assert_eq!(list.len().unwrap(), 1);
    assert_eq!(list.namespace().segments().unwrap(), ["orphans_keys", "orphans_val_0"]);
}

#[test]
fn items_read_each_value_lazily() {
    let (_, ns) = setup();
    let mut dict = ShDict::create(&ns, "lazy", map([("a", 1), ("b", 2)])).unwrap();
    let mut other = ShDict::open(&ns, "lazy").unwrap();

    let mut items = dict.items().unwrap();
    let (key, first) = items.next().unwrap().unwrap();
    assert_eq!(key, "a");
    assert_eq!(first.as_scalar(), Some(&Scalar::Int(1)));

    other.set("b", 20).unwrap();

    let (key, second) = items.next().unwrap().unwrap();
    assert_eq!(key, "b");
    assert_eq!(second.as_scalar(), Some(&Scalar::Int(20)));
    assert!(items.next().is_none());

    assert!(other.namespace().segments().unwrap().contains(&"lazy_val_b".to_owned()));
}

#[test]
fn nesting_depth_is_bounded_by_names() {
    let (_, ns) = setup();
    let mut dict = ShDict::create(&ns, "deep", BTreeMap::new()).unwrap();

    let nested = |depth: usize| {
        let mut value = Value::from(1);
        for _ in 0..depth {
            value = Value::List(vec![value]);
        }
        value
    };

    dict.set("a", nested(3)).unwrap();
    let before = ns.segments().unwrap();

    let err = dict.set("a", nested(12)).unwrap_err();
    assert!(matches!(err, Error::Segment(SegmentError::InvalidName { .. })), "{err:?}");
    assert_eq!(ns.segments().unwrap(), before);
    assert_eq!(dict.get_item("a").unwrap().into_value().unwrap(), nested(3));
}
