// tests/sync_integration_test.rs
//! End-to-end tests for the sync layer: scripted SDK events in, observable
//! state graph out.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use callsync::events::{TrackInfo, TrackKind, TrackState};
use callsync::sdk::{MeetingSessionData, NetworkTopology, ReceiveSettings};
use callsync::store::record::WaitingParticipant;
use callsync::store::selectors::{Filter, FilterTag, Sort, SortTag};
use callsync::{CallEvent, CallStateSync, MeetingState, ParticipantRecord, RosterSnapshot};

use common::MockCallSdk;

/// Longer than both the roster poll interval and the batch window.
const SETTLE: Duration = Duration::from_millis(250);

fn new_session() -> (Arc<MockCallSdk>, Arc<CallStateSync>) {
    common::init_tracing();
    let sdk = Arc::new(MockCallSdk::new());
    let sync = CallStateSync::start(sdk.clone());
    (sdk, sync)
}

fn local(id: &str) -> ParticipantRecord {
    ParticipantRecord::new(id)
        .with("local", json!(true))
        .with("user_name", json!("Me"))
}

fn remote(id: &str) -> ParticipantRecord {
    ParticipantRecord::new(id)
        .with("local", json!(false))
        .with("user_name", json!(id.to_uppercase()))
        .with("tracks", json!({"audio": {"state": "playable"}}))
}

fn joined(participants: Vec<ParticipantRecord>) -> CallEvent {
    CallEvent::JoinedMeeting {
        participants: RosterSnapshot::new(participants),
    }
}

#[tokio::test(start_paused = true)]
async fn roster_poll_initializes_store_once() {
    let (sdk, sync) = new_session();

    // nothing to init from yet
    tokio::time::sleep(SETTLE).await;
    assert!(sync.store().roster().is_empty());

    sdk.set_participants(Some(RosterSnapshot::new(vec![local("L"), remote("r1")])));
    tokio::time::sleep(SETTLE).await;

    assert_eq!(sync.store().roster(), vec!["L", "r1"]);
    assert_eq!(sync.store().local_id(), "L");

    // the poll stops after the first usable snapshot; later snapshot
    // changes only reach the store through events
    sdk.set_participants(Some(RosterSnapshot::new(vec![
        local("L"),
        remote("r1"),
        remote("r2"),
    ])));
    tokio::time::sleep(SETTLE).await;
    assert_eq!(sync.store().roster(), vec!["L", "r1"]);
}

#[tokio::test(start_paused = true)]
async fn joined_meeting_seeds_roster_and_feature_slices() {
    common::init_tracing();
    let sdk = Arc::new(MockCallSdk::new());
    sdk.set_meeting_state(MeetingState::JoinedMeeting);
    sdk.set_topology(NetworkTopology::Sfu);
    sdk.set_session(MeetingSessionData {
        data: json!({"phase": "warmup"}),
        topology: NetworkTopology::Sfu,
    });
    let mut settings = ReceiveSettings::new();
    settings.insert("base".to_string(), json!({"video": {"layer": 2}}));
    sdk.set_receive_settings(settings);

    let sync = CallStateSync::start(sdk.clone());
    sync.dispatch(joined(vec![local("L"), remote("r1")]));
    tokio::time::sleep(SETTLE).await;

    assert_eq!(sync.store().roster(), vec!["L", "r1"]);
    assert_eq!(sync.meeting_state(), MeetingState::JoinedMeeting);
    assert_eq!(sync.session_data().data, json!({"phase": "warmup"}));
    assert_eq!(sync.network().topology, NetworkTopology::Sfu);
    assert_eq!(
        sync.receive_settings().effective("r1"),
        json!({"video": {"layer": 2}})
    );
}

#[tokio::test(start_paused = true)]
async fn participant_burst_flushes_as_one_view_update() {
    let (_sdk, sync) = new_session();
    sync.dispatch(joined(vec![local("L")]));
    tokio::time::sleep(SETTLE).await;

    let mut all = sync.store().ids_view(FilterTag::All, SortTag::None);
    all.borrow_and_update();

    sync.dispatch(CallEvent::ParticipantJoined {
        participant: remote("r1"),
    });
    sync.dispatch(CallEvent::ParticipantJoined {
        participant: remote("r2").with("owner", json!(true)),
    });
    sync.dispatch(CallEvent::ActiveSpeakerChange {
        session_id: "r1".into(),
    });

    // nothing applied until the window flushes
    assert_eq!(sync.store().roster(), vec!["L"]);
    tokio::time::sleep(SETTLE).await;

    assert!(all.has_changed().unwrap());
    assert_eq!(*all.borrow_and_update(), vec!["L", "r1", "r2"]);
    assert_eq!(sync.store().active_id(), Some("r1".to_string()));
    assert_eq!(
        sync.store().property("r1", "tracks.audio.state"),
        json!("playable")
    );

    let mut owners = sync.store().ids_view(FilterTag::Owner, SortTag::None);
    assert_eq!(*owners.borrow_and_update(), vec!["r2"]);
    let mut remotes = sync.store().ids_view(FilterTag::Remote, SortTag::UserName);
    assert_eq!(*remotes.borrow_and_update(), vec!["r1", "r2"]);
}

#[tokio::test(start_paused = true)]
async fn record_flagged_participant_implies_local_recording() {
    let (_sdk, sync) = new_session();
    sync.dispatch(joined(vec![local("L")]));
    tokio::time::sleep(SETTLE).await;

    sync.dispatch(CallEvent::ParticipantJoined {
        participant: remote("r1").with("record", json!(true)),
    });
    tokio::time::sleep(SETTLE).await;

    let recording = sync.recording();
    assert!(recording.is_recording);
    assert!(recording.is_local_participant_recorded);
    assert_eq!(recording.kind.as_deref(), Some("local"));
    // the local participant is not the one holding the flag
    assert_eq!(recording.local, Some(false));

    sync.dispatch(CallEvent::ParticipantLeft {
        participant: remote("r1"),
    });
    tokio::time::sleep(SETTLE).await;
    assert!(!sync.recording().is_recording);
}

#[tokio::test(start_paused = true)]
async fn record_flag_in_initial_snapshot_implies_recording() {
    let (_sdk, sync) = new_session();
    sync.dispatch(joined(vec![
        local("L"),
        remote("r1").with("record", json!(true)),
    ]));
    tokio::time::sleep(SETTLE).await;

    let recording = sync.recording();
    assert!(recording.is_recording);
    assert_eq!(recording.kind.as_deref(), Some("local"));
}

#[tokio::test(start_paused = true)]
async fn record_flag_in_polled_snapshot_implies_recording() {
    let (sdk, sync) = new_session();
    sdk.set_participants(Some(RosterSnapshot::new(vec![
        local("L"),
        remote("r1").with("record", json!(true)),
    ])));
    tokio::time::sleep(SETTLE).await;

    assert_eq!(sync.store().roster(), vec!["L", "r1"]);
    assert!(sync.recording().is_recording);
}

#[tokio::test(start_paused = true)]
async fn track_started_merges_into_existing_tracks() {
    let (_sdk, sync) = new_session();
    sync.dispatch(joined(vec![local("L"), remote("r1")]));
    tokio::time::sleep(SETTLE).await;

    sync.dispatch(CallEvent::TrackStarted {
        session_id: "r1".into(),
        track: TrackInfo {
            kind: TrackKind::ScreenVideo,
            state: TrackState::Playable,
        },
    });

    let store = sync.store();
    assert_eq!(
        store.property("r1", "tracks.screenVideo.state"),
        json!("playable")
    );
    // the pre-existing audio track survives the merge
    assert_eq!(store.property("r1", "tracks.audio.state"), json!("playable"));

    let mut screens = store.ids_view(FilterTag::Screen, SortTag::None);
    assert_eq!(*screens.borrow_and_update(), vec!["r1"]);
}

#[tokio::test(start_paused = true)]
async fn custom_view_republishes_after_batched_join() {
    let (_sdk, sync) = new_session();
    sync.dispatch(joined(vec![local("L")]));
    tokio::time::sleep(SETTLE).await;

    let view = sync.store().custom_ids_view(
        Filter::Custom(Arc::new(|p: &ParticipantRecord| !p.is_local())),
        Sort::Tag(SortTag::None),
    );
    let mut rx = view.watch();
    assert!(rx.borrow_and_update().is_empty());

    sync.dispatch(CallEvent::ParticipantJoined {
        participant: remote("r1"),
    });
    tokio::time::sleep(SETTLE).await;

    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), vec!["r1"]);
}

#[tokio::test(start_paused = true)]
async fn waiting_room_tracks_adds_and_blank_resets_removed() {
    let (_sdk, sync) = new_session();

    sync.dispatch(CallEvent::WaitingParticipantAdded {
        participant: WaitingParticipant::new("w1", "Ada"),
    });
    sync.dispatch(CallEvent::WaitingParticipantAdded {
        participant: WaitingParticipant::new("w2", "Grace"),
    });
    tokio::time::sleep(SETTLE).await;
    assert_eq!(sync.store().waiting_ids(), vec!["w1", "w2"]);

    sync.dispatch(CallEvent::WaitingParticipantRemoved { id: "w1".into() });
    tokio::time::sleep(SETTLE).await;

    assert_eq!(sync.store().waiting_ids(), vec!["w2"]);
    assert_eq!(sync.store().waiting("w1"), WaitingParticipant::blank("w1"));
    assert_eq!(sync.store().waiting("w2").name, "Grace");
}

#[tokio::test(start_paused = true)]
async fn transcript_message_flags_transcribing_for_late_joiner() {
    let (_sdk, sync) = new_session();

    sync.dispatch(CallEvent::AppMessage {
        from_id: "transcription".into(),
        data: json!({"session_id": "r1", "text": "hello", "timestamp": "t0"}),
    });

    let state = sync.transcription();
    assert!(state.is_transcribing);
    assert_eq!(state.transcriptions.len(), 1);
    assert_eq!(state.transcriptions[0].text, "hello");
}

#[tokio::test(start_paused = true)]
async fn leave_resets_roster_but_keeps_fatal_error() {
    let (_sdk, sync) = new_session();
    sync.dispatch(joined(vec![local("L"), remote("r1")]));
    tokio::time::sleep(SETTLE).await;

    sync.dispatch(CallEvent::Error {
        message: "meeting full".into(),
    });
    sync.dispatch(CallEvent::LeftMeeting);

    assert!(sync.store().roster().is_empty());
    assert_eq!(sync.store().property("r1", "user_name"), Value::Null);
    assert_eq!(sync.fatal_error().unwrap().message, "meeting full");

    sync.dispatch(CallEvent::CallInstanceDestroyed);
    assert_eq!(sync.fatal_error(), None);
    assert_eq!(sync.meeting_state(), MeetingState::New);
}

#[tokio::test(start_paused = true)]
async fn active_speaker_stamps_last_active_through_batch() {
    let (_sdk, sync) = new_session();
    sync.dispatch(joined(vec![local("L"), remote("r1")]));
    tokio::time::sleep(SETTLE).await;

    let before = Utc::now();
    sync.dispatch(CallEvent::ActiveSpeakerChange {
        session_id: "r1".into(),
    });
    tokio::time::sleep(SETTLE).await;

    assert_eq!(sync.store().active_id(), Some("r1".to_string()));
    let stamp = sync.store().property("r1", "last_active");
    let stamp = stamp.as_str().expect("last_active is an rfc3339 string");
    assert!(stamp >= before.to_rfc3339().as_str());
}

#[tokio::test(start_paused = true)]
async fn receive_settings_push_is_gated_on_joined_state() {
    let (sdk, sync) = new_session();

    let mut settings = ReceiveSettings::new();
    settings.insert("r1".to_string(), json!({"video": {"layer": 0}}));

    // not joined yet: silently dropped
    sync.update_receive_settings(settings.clone()).unwrap();
    assert!(sdk.pushed_receive_settings.lock().unwrap().is_empty());

    sdk.set_meeting_state(MeetingState::JoinedMeeting);
    sync.dispatch(joined(vec![local("L")]));
    tokio::time::sleep(SETTLE).await;

    sync.update_receive_settings(settings.clone()).unwrap();
    assert_eq!(*sdk.pushed_receive_settings.lock().unwrap(), vec![settings]);
}

#[tokio::test(start_paused = true)]
async fn ensure_subscribed_only_calls_sdk_in_manual_mode() {
    let (sdk, sync) = new_session();

    sync.ensure_subscribed("r1").unwrap();
    assert!(sdk.subscribed_tracks.lock().unwrap().is_empty());

    sdk.set_auto_subscribe(false);
    sync.ensure_subscribed("r1").unwrap();
    let calls = sdk.subscribed_tracks.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "r1");
    assert!(calls[0].1.audio && calls[0].1.screen_video);
}

#[tokio::test(start_paused = true)]
async fn dispose_tears_down_all_state() {
    let (_sdk, sync) = new_session();
    sync.dispatch(joined(vec![local("L"), remote("r1")]));
    sync.dispatch(CallEvent::AppMessage {
        from_id: "transcription".into(),
        data: json!({"text": "hello"}),
    });
    tokio::time::sleep(SETTLE).await;

    sync.dispose();

    assert!(sync.store().roster().is_empty());
    assert_eq!(sync.store().local_id(), "");
    assert!(!sync.transcription().is_transcribing);
    assert_eq!(sync.meeting_state(), MeetingState::New);

    // disposed sessions ignore further events
    sync.dispatch(joined(vec![local("L")]));
    tokio::time::sleep(SETTLE).await;
    assert!(sync.store().roster().is_empty());
}
