//! Round-trip every value shape through the serializer, as peers do.

use pretty_assertions::assert_eq;
use splashproto::{deserialize, get_size, serialize, values, Seed, Task, Value, Values};
use bytes::BytesMut;
use uuid::Uuid;

fn scalars() -> Vec<Value> {
    vec![
        Value::from(true),
        Value::from(false),
        Value::from(0),
        Value::from(-1),
        Value::from(i64::MIN),
        Value::from(0.1),
        Value::from(-1.0e300),
        Value::from(""),
        Value::from("ümlaut ✓"),
        Value::named("gamma", 2.2),
    ]
}

fn nest(depth: usize) -> Vec<Value> {
    if depth == 0 {
        return scalars();
    }
    let inner = nest(depth - 1);
    let mut shapes = inner.clone();
    shapes.push(Value::from(inner.clone()));
    shapes.push(Value::from(Values::new()));
    shapes.push(Value::named("nested", inner));
    shapes
}

#[test]
fn values_up_to_depth_three_roundtrip() {
    for value in nest(3) {
        let mut buf = BytesMut::new();
        serialize(&value, &mut buf);
        assert_eq!(buf.len(), get_size(&value));
        let back: Value = deserialize(&buf, 0).unwrap();
        assert_eq!(back, value);
    }
}

#[test]
fn consecutive_fields_walk_by_size() {
    let fields = vec![
        Value::from("name"),
        Value::from(values![1, 2, 3]),
        Value::named("enabled", true),
    ];

    let mut buf = BytesMut::new();
    for field in &fields {
        serialize(field, &mut buf);
    }

    let mut offset = 0;
    for expected in &fields {
        let value: Value = deserialize(&buf, offset).unwrap();
        assert_eq!(&value, expected);
        offset += get_size(&value);
    }
    assert_eq!(offset, buf.len());
}

#[test]
fn seed_payload_survives_truncation_checks() {
    let seeds = vec![
        Seed::new(Task::AddLeaf, "/world/attributes/masterClock", None, Uuid::new_v4()),
        Seed::new(Task::SetLeaf, "/world/attributes/masterClock", Some(Value::from(values![0, 1, 2])), Uuid::new_v4()),
    ];
    let mut buf = BytesMut::new();
    serialize(&seeds, &mut buf);

    let back: Vec<Seed> = deserialize(&buf, 0).unwrap();
    assert_eq!(back, seeds);

    for cut in [1, buf.len() / 2, buf.len() - 1] {
        assert!(deserialize::<Vec<Seed>>(&buf[..cut], 0).is_err());
    }
}
