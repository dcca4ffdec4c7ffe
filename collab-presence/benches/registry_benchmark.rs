use chrono::Utc;
use collab_presence::protocol::{
    self, CursorPosition, EventKind, EventPayload, PresenceData, PresenceEntry,
};
use collab_presence::registry::{self, CollaboratorRegistry};
use collab_presence::CollaborationEvent;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn presence_event(users: usize) -> CollaborationEvent {
    let active_users = (0..users)
        .map(|i| PresenceEntry {
            user_id: format!("user-{i}"),
            name: format!("User {i}"),
            color: "#3366ff".into(),
            cursor: Some(CursorPosition::new(i as f64, i as f64)),
            last_seen: None,
        })
        .collect();
    CollaborationEvent {
        kind: EventKind::Presence,
        user_id: String::new(),
        name: None,
        color: None,
        payload: EventPayload::Presence(PresenceData { active_users }),
        timestamp: None,
        received_at: Utc::now(),
    }
}

fn cursor_event(user_id: &str) -> CollaborationEvent {
    CollaborationEvent {
        kind: EventKind::Cursor,
        user_id: user_id.into(),
        name: None,
        color: None,
        payload: EventPayload::Cursor(CursorPosition::new(12.0, 34.0).at_text(5, 8)),
        timestamp: None,
        received_at: Utc::now(),
    }
}

fn bench_decode_cursor(c: &mut Criterion) {
    let raw = r#"{"eventKind":"cursor","userId":"user-7","data":{"x":12,"y":34,"line":5,"character":8},"timestamp":"2024-05-01T12:00:00Z"}"#;
    let now = Utc::now();

    c.bench_function("decode_cursor", |b| {
        b.iter(|| {
            black_box(protocol::decode(black_box(raw), now).unwrap());
        })
    });
}

fn bench_presence_resync_100(c: &mut Criterion) {
    let event = presence_event(100);
    let empty = CollaboratorRegistry::new();

    c.bench_function("presence_resync_100_users", |b| {
        b.iter(|| {
            black_box(registry::apply(black_box(&event), &empty));
        })
    });
}

fn bench_cursor_apply_100(c: &mut Criterion) {
    let base = registry::apply(&presence_event(100), &CollaboratorRegistry::new());
    let event = cursor_event("user-42");

    c.bench_function("cursor_apply_100_users", |b| {
        b.iter(|| {
            black_box(registry::apply(black_box(&event), &base));
        })
    });
}

criterion_group!(
    benches,
    bench_decode_cursor,
    bench_presence_resync_100,
    bench_cursor_apply_100,
);
criterion_main!(benches);
