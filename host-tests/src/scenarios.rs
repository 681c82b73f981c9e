use crate::fakes::{firmware_image, identity, CountingRestart, JournaledStorage, ScriptedTransport};
use md5::{Digest, Md5};
use update_core::error::{StorageError, TransportError};
use update_core::events::{from_fn, UpdateEvent};
use update_core::protocol::{
    HEADER_FREE_SPACE, HEADER_MODE, HEADER_SKETCH_MD5, HEADER_SKETCH_SHA256, HEADER_SKETCH_SIZE, HEADER_VERSION,
};
use update_core::{
    BasicAuth, DeviceIdentity, HttpUpdater, Outcome, Phase, TargetKind, UpdateConfig, UpdateError, UpdateRequest,
};

type Updater<'r> = HttpUpdater<JournaledStorage, &'r CountingRestart>;

fn updater(storage: JournaledStorage, restart: &CountingRestart) -> Updater<'_> {
    let config = UpdateConfig {
        chunk_size: 256,
        ..Default::default()
    };
    HttpUpdater::new(storage, restart, config)
}

fn run_update(updater: &Updater<'_>, transport: &mut ScriptedTransport) -> (Outcome, Vec<UpdateEvent>) {
    let mut events: Vec<UpdateEvent> = Vec::new();
    let outcome = updater.update(transport, &identity(), "1.0.0.15", &mut events);
    (outcome, events)
}

fn md5_hex(bytes: &[u8]) -> String {
    hex::encode_upper(Md5::digest(bytes))
}

#[test]
fn unexpected_status_opens_no_session() {
    for status in [100, 201, 204, 206, 301, 302, 400, 401, 500, 503] {
        let restart = CountingRestart::default();
        let updater = updater(JournaledStorage::new(2048), &restart);
        let mut transport = ScriptedTransport::new(status)
            .with_content_length(1024)
            .with_body(firmware_image(1024));

        let (outcome, events) = run_update(&updater, &mut transport);

        assert_eq!(outcome, Outcome::Failed(UpdateError::ServerWrongStatusCode), "status {}", status);
        assert_eq!(events, vec![UpdateEvent::Error(UpdateError::ServerWrongStatusCode)]);
        assert_eq!(transport.bytes_read, 0);
        assert!(updater.storage().untouched());
        assert_eq!(updater.phase(), Phase::Rejected);
    }
}

#[test]
fn not_found_and_forbidden() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);

    let mut transport = ScriptedTransport::new(404).with_content_length(10);
    assert_eq!(run_update(&updater, &mut transport).0, Outcome::Failed(UpdateError::ServerFileNotFound));

    let mut transport = ScriptedTransport::new(403);
    assert_eq!(run_update(&updater, &mut transport).0, Outcome::Failed(UpdateError::ServerForbidden));
    assert_eq!(updater.last_error_string(), "Forbidden (403)");
    assert!(updater.storage().untouched());
}

#[test]
fn ok_without_length_is_rejected() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);

    let mut zero = ScriptedTransport::new(200).with_content_length(0).with_body(firmware_image(16));
    assert_eq!(run_update(&updater, &mut zero).0, Outcome::Failed(UpdateError::ServerDidNotReportSize));

    let mut absent = ScriptedTransport::new(200).with_body(firmware_image(16));
    assert_eq!(run_update(&updater, &mut absent).0, Outcome::Failed(UpdateError::ServerDidNotReportSize));

    assert!(updater.storage().untouched());
    assert_eq!(zero.bytes_read + absent.bytes_read, 0);
}

#[test]
fn not_modified_means_no_update() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let mut transport = ScriptedTransport::new(304);

    let (outcome, events) = run_update(&updater, &mut transport);

    assert_eq!(outcome, Outcome::NoUpdateAvailable);
    assert!(events.is_empty());
    assert!(updater.storage().untouched());
    assert_eq!(updater.last_error(), None);
    assert_eq!(updater.phase(), Phase::NoUpdate);
    assert_eq!(restart.count(), 0);
}

#[test]
fn firmware_update_applies_and_restarts() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let image = firmware_image(1024);
    let mut transport = ScriptedTransport::serving(image.clone()).with_max_read(100);

    let (outcome, events) = run_update(&updater, &mut transport);

    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(restart.count(), 1);
    assert_eq!(updater.phase(), Phase::Committed);
    assert_eq!(updater.last_error(), None);

    assert_eq!(events.first(), Some(&UpdateEvent::Start));
    assert_eq!(events.get(1), Some(&UpdateEvent::Progress { written: 0, total: 1024 }));
    assert_eq!(events.last(), Some(&UpdateEvent::End));
    assert_eq!(
        events.get(events.len() - 2),
        Some(&UpdateEvent::Progress { written: 1024, total: 1024 })
    );
    let progress: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            UpdateEvent::Progress { written, .. } => Some(*written),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] < w[1]));

    let storage = updater.storage();
    assert_eq!(storage.memory.image(TargetKind::Executable), Some(&image[..]));
    assert_eq!(storage.journal.sessions_opened, 1);
    assert_eq!(storage.journal.finalized, 1);
    assert_eq!(storage.journal.aborted, 0);
}

#[test]
fn identification_headers_are_sent() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let mut transport = ScriptedTransport::new(304);

    run_update(&updater, &mut transport);

    assert_eq!(transport.requests, 1);
    assert_eq!(transport.sent(HEADER_MODE), Some("sketch"));
    assert_eq!(transport.sent(HEADER_FREE_SPACE), Some("2048"));
    assert_eq!(transport.sent(HEADER_VERSION), Some("1.0.0.15"));
    assert_eq!(transport.sent("Cache-Control"), Some("no-cache"));
    assert_eq!(transport.sent("Authorization"), None);
    assert_eq!(transport.timeout, Some(std::time::Duration::from_millis(8000)));
}

#[test]
fn running_image_is_described_to_the_server() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let mut transport = ScriptedTransport::new(304);
    let running = firmware_image(1024);

    run_update(&updater, &mut transport);

    assert_eq!(transport.sent(HEADER_SKETCH_SIZE), Some("1024"));
    assert_eq!(transport.sent(HEADER_SKETCH_MD5), Some(hex::encode(Md5::digest(&running)).as_str()));
    let sha256 = transport.sent(HEADER_SKETCH_SHA256).unwrap_or_default();
    assert_eq!(sha256.len(), 64);
    assert_eq!(sha256, sha256.to_ascii_uppercase());
}

#[test]
fn credentials_become_basic_auth() {
    let restart = CountingRestart::default();
    let config = UpdateConfig {
        credentials: Some(BasicAuth {
            user: "device".to_string(),
            password: "secret".to_string(),
        }),
        ..Default::default()
    };
    let updater = HttpUpdater::new(JournaledStorage::new(2048), &restart, config);
    let mut transport = ScriptedTransport::new(304);

    updater.update(&mut transport, &identity(), "", &mut ());

    assert_eq!(transport.sent("Authorization"), Some("Basic ZGV2aWNlOnNlY3JldA=="));
    assert_eq!(transport.sent(HEADER_VERSION), None);
}

#[test]
fn bad_magic_byte_never_reaches_storage() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let mut image = firmware_image(1024);
    image[0] = 0x00;
    let mut transport = ScriptedTransport::serving(image);

    let (outcome, events) = run_update(&updater, &mut transport);

    assert_eq!(outcome, Outcome::Failed(UpdateError::BinaryHeaderVerificationFailed));
    assert_eq!(events.last(), Some(&UpdateEvent::Error(UpdateError::BinaryHeaderVerificationFailed)));
    assert!(!events.contains(&UpdateEvent::End));
    assert_eq!(updater.storage().journal.bytes_written, 0);
    assert_eq!(updater.storage().journal.sessions_opened, 0);
    assert_eq!(restart.count(), 0);
}

#[test]
fn image_larger_than_free_space_is_refused() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(1024), &restart);
    let mut transport = ScriptedTransport::serving(firmware_image(4096));

    let (outcome, events) = run_update(&updater, &mut transport);

    assert_eq!(outcome, Outcome::Failed(UpdateError::InsufficientSpace));
    assert_eq!(events, vec![UpdateEvent::Error(UpdateError::InsufficientSpace)]);
    assert_eq!(transport.bytes_read, 0);
    assert!(updater.storage().untouched());
    assert_eq!(updater.last_error_string(), "Not Enough space");
}

#[test]
fn data_update_without_partition() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let mut transport = ScriptedTransport::serving(vec![0u8; 512]);

    let outcome = updater.update_data(&mut transport, &identity(), "", &mut ());

    assert_eq!(outcome, Outcome::Failed(UpdateError::NoPartition));
    assert_eq!(transport.sent(HEADER_MODE), Some("spiffs"));
    assert!(updater.storage().untouched());
}

#[test]
fn partition_lost_after_validation_is_no_partition() {
    let restart = CountingRestart::default();
    let mut storage = JournaledStorage::new(2048);
    storage.begin_error = Some(StorageError::new(StorageError::NO_PARTITION));
    let updater = updater(storage, &restart);

    let (outcome, events) = run_update(&updater, &mut ScriptedTransport::serving(firmware_image(512)));

    assert_eq!(outcome, Outcome::Failed(UpdateError::NoPartition));
    assert_eq!(events.last(), Some(&UpdateEvent::Error(UpdateError::NoPartition)));
    assert_eq!(updater.last_error_string(), "Partition Could Not be Found");
    assert_eq!(restart.count(), 0);
}

#[test]
fn other_begin_failures_stay_storage_errors() {
    let restart = CountingRestart::default();
    let mut storage = JournaledStorage::new(2048);
    storage.begin_error = Some(StorageError::new(StorageError::ERASE));
    let updater = updater(storage, &restart);

    let (outcome, _) = run_update(&updater, &mut ScriptedTransport::serving(firmware_image(512)));

    assert_eq!(outcome, Outcome::Failed(UpdateError::Storage(StorageError::new(StorageError::ERASE))));
}

#[test]
fn data_update_skips_magic_and_restart() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048).with_data_partition(1024), &restart);
    let data = vec![0x00, 0x42, 0x13, 0x37];
    let mut transport = ScriptedTransport::serving(data.clone());

    let outcome = updater.update_data(&mut transport, &identity(), "", &mut ());

    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(restart.count(), 0);
    assert_eq!(updater.storage().memory.image(TargetKind::AuxiliaryData), Some(&data[..]));
}

#[test]
fn mixed_case_checksum_is_canonicalized() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let mut transport = ScriptedTransport::serving(firmware_image(1024))
        .with_header("X-MD5", "AA11BB22CC33DD44EE55FF6600778899");

    let (outcome, _) = run_update(&updater, &mut transport);

    match outcome {
        Outcome::Failed(UpdateError::Storage(e)) => assert!(e.is_checksum_mismatch()),
        other => panic!("expected checksum mismatch, got {:?}", other),
    }
    let storage = updater.storage();
    assert_eq!(storage.journal.checksums, vec!["aa11bb22cc33dd44ee55ff6600778899".to_string()]);
    assert_eq!(storage.memory.commits(TargetKind::Executable), 0);
    assert_eq!(restart.count(), 0);
}

#[test]
fn matching_checksum_in_upper_case_applies() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let image = firmware_image(1024);
    let mut transport = ScriptedTransport::serving(image.clone()).with_header("x-md5", &md5_hex(&image));

    let (outcome, _) = run_update(&updater, &mut transport);

    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(
        updater.storage().memory.executable_md5(),
        Some(md5_hex(&image).to_ascii_lowercase())
    );
}

#[test]
fn malformed_checksum_aborts_before_writing() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let mut transport = ScriptedTransport::serving(firmware_image(1024)).with_header("x-MD5", "not-a-digest");

    let (outcome, _) = run_update(&updater, &mut transport);

    assert_eq!(outcome, Outcome::Failed(UpdateError::FaultyChecksum));
    let storage = updater.storage();
    assert_eq!(storage.journal.bytes_written, 0);
    assert_eq!(storage.journal.aborted, 1);
}

#[test]
fn repeated_update_has_same_outcome() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let image = firmware_image(700);

    let first = run_update(&updater, &mut ScriptedTransport::serving(image.clone())).0;
    let second = run_update(&updater, &mut ScriptedTransport::serving(image.clone())).0;

    assert_eq!(first, Outcome::Applied);
    assert_eq!(first, second);
    assert_eq!(updater.storage().memory.commits(TargetKind::Executable), 2);
    assert_eq!(restart.count(), 2);
}

#[test]
fn extra_body_bytes_are_ignored() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let body = firmware_image(1500);
    let mut transport = ScriptedTransport::new(200).with_content_length(1024).with_body(body.clone());

    let (outcome, _) = run_update(&updater, &mut transport);

    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(transport.bytes_read, 1024);
    assert_eq!(updater.storage().memory.image(TargetKind::Executable), Some(&body[..1024]));
}

#[test]
fn short_body_fails_and_aborts() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let mut transport = ScriptedTransport::new(200)
        .with_content_length(1024)
        .with_body(firmware_image(600));

    let (outcome, events) = run_update(&updater, &mut transport);

    assert_eq!(outcome, Outcome::Failed(UpdateError::Truncated { received: 600, expected: 1024 }));
    assert!(!events.contains(&UpdateEvent::End));
    assert_eq!(updater.phase(), Phase::Failed);
    let storage = updater.storage();
    assert_eq!(storage.journal.aborted, 1);
    assert_eq!(storage.journal.finalized, 0);
    assert_eq!(storage.memory.commits(TargetKind::Executable), 0);
}

#[test]
fn body_read_error_is_reported_once() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let mut transport = ScriptedTransport::serving(firmware_image(1024)).failing_body_at(512);

    let (outcome, events) = run_update(&updater, &mut transport);

    let expected = UpdateError::Transport(TransportError::connection_failed());
    assert_eq!(outcome, Outcome::Failed(expected));
    let errors = events.iter().filter(|e| matches!(e, UpdateEvent::Error(_))).count();
    assert_eq!(errors, 1);
    assert_eq!(updater.storage().journal.aborted, 1);
}

#[test]
fn partial_storage_write_fails() {
    let restart = CountingRestart::default();
    let mut storage = JournaledStorage::new(2048);
    storage.write_limit = Some(10);
    let updater = updater(storage, &restart);
    let mut transport = ScriptedTransport::serving(firmware_image(1024));

    let (outcome, _) = run_update(&updater, &mut transport);

    assert_eq!(outcome, Outcome::Failed(UpdateError::Storage(StorageError::new(StorageError::WRITE))));
    assert_eq!(restart.count(), 0);
}

#[test]
fn reboot_can_be_disabled() {
    let restart = CountingRestart::default();
    let config = UpdateConfig {
        reboot_on_update: false,
        ..Default::default()
    };
    let updater = HttpUpdater::new(JournaledStorage::new(2048), &restart, config);
    let mut transport = ScriptedTransport::serving(firmware_image(1024));

    let outcome = updater.update(&mut transport, &identity(), "", &mut ());

    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(restart.count(), 0);
}

#[test]
fn transport_failure_before_status() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let mut transport = ScriptedTransport::new(200).failing_before_status(TransportError::timed_out());

    let (outcome, events) = run_update(&updater, &mut transport);

    let expected = UpdateError::Transport(TransportError::timed_out());
    assert_eq!(outcome, Outcome::Failed(expected));
    assert_eq!(events, vec![UpdateEvent::Error(expected)]);
    assert_eq!(updater.last_error(), Some(expected));
    assert!(updater.last_error_string().starts_with("HTTP error: timed out"));
    assert!(updater.storage().untouched());
}

#[test]
fn connection_failure_sends_nothing() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let mut transport = ScriptedTransport::new(200).failing_to_connect(TransportError::connection_failed());

    let (outcome, _) = run_update(&updater, &mut transport);

    assert_eq!(outcome, Outcome::Failed(UpdateError::Transport(TransportError::connection_failed())));
    assert!(transport.sent_headers.is_empty());
}

#[test]
fn image_for_larger_flash_is_refused() {
    let restart = CountingRestart::default();
    let config = UpdateConfig {
        verify_flash_size: true,
        ..Default::default()
    };
    let updater = HttpUpdater::new(JournaledStorage::new(2048), &restart, config);
    let mut image = firmware_image(1024);
    image[3] = 0x40;
    let mut transport = ScriptedTransport::serving(image);

    let outcome = updater.update(&mut transport, &identity(), "", &mut ());

    assert_eq!(outcome, Outcome::Failed(UpdateError::WrongFlashTarget));
    assert_eq!(updater.storage().journal.sessions_opened, 0);
}

#[test]
fn flash_check_keeps_peeked_bytes() {
    let restart = CountingRestart::default();
    let config = UpdateConfig {
        verify_flash_size: true,
        ..Default::default()
    };
    let updater = HttpUpdater::new(JournaledStorage::new(2048), &restart, config);
    let image = firmware_image(1024);
    let mut transport = ScriptedTransport::serving(image.clone()).with_max_read(1);

    let outcome = updater.update(&mut transport, &identity(), "", &mut ());

    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(updater.storage().memory.image(TargetKind::Executable), Some(&image[..]));
}

#[test]
fn success_clears_previous_error() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);

    run_update(&updater, &mut ScriptedTransport::new(500));
    assert_eq!(updater.last_error(), Some(UpdateError::ServerWrongStatusCode));

    run_update(&updater, &mut ScriptedTransport::serving(firmware_image(64)));
    assert_eq!(updater.last_error(), None);
    assert_eq!(updater.last_error_string(), "");
}

#[test]
fn previous_error_is_cleared_when_a_call_starts() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let device = identity();

    run_update(&updater, &mut ScriptedTransport::new(404));
    assert_eq!(updater.last_error(), Some(UpdateError::ServerFileNotFound));

    let mut seen_at_start = Some(UpdateError::ServerFileNotFound);
    let mut listener = from_fn(|event: &UpdateEvent| {
        if *event == UpdateEvent::Start {
            seen_at_start = updater.last_error();
        }
    });
    let outcome = updater.update(&mut ScriptedTransport::serving(firmware_image(64)), &device, "", &mut listener);

    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(seen_at_start, None);
}

#[test]
fn nested_update_is_refused() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let device: DeviceIdentity = identity();
    let mut nested = None;
    let mut nested_transport = ScriptedTransport::serving(firmware_image(64));

    let outcome = {
        let mut listener = from_fn(|event: &UpdateEvent| {
            if *event == UpdateEvent::Start && nested.is_none() {
                nested = Some(updater.update(&mut nested_transport, &device, "", &mut ()));
            }
        });
        let request = UpdateRequest {
            target: TargetKind::Executable,
            identity: &device,
            current_version: "",
        };
        updater.apply(&request, &mut ScriptedTransport::serving(firmware_image(128)), &mut listener)
    };

    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(nested, Some(Outcome::Failed(UpdateError::SessionInProgress)));
    assert_eq!(nested_transport.requests, 0);
    assert_eq!(updater.last_error(), None);
}

#[test]
fn events_can_go_over_a_channel() {
    let restart = CountingRestart::default();
    let updater = updater(JournaledStorage::new(2048), &restart);
    let (mut tx, rx) = std::sync::mpsc::channel::<UpdateEvent>();

    updater.update(&mut ScriptedTransport::serving(firmware_image(300)), &identity(), "", &mut tx);

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.first(), Some(&UpdateEvent::Start));
    assert_eq!(events.last(), Some(&UpdateEvent::End));
}

proptest::proptest! {
    #[test]
    fn prop_unknown_status_never_touches_storage(status in 100u16..600) {
        proptest::prop_assume!(![200, 304, 403, 404].contains(&status));
        let restart = CountingRestart::default();
        let updater = updater(JournaledStorage::new(2048), &restart);
        let mut transport = ScriptedTransport::new(status).with_content_length(16).with_body(firmware_image(16));

        let (outcome, _) = run_update(&updater, &mut transport);

        proptest::prop_assert_eq!(outcome, Outcome::Failed(UpdateError::ServerWrongStatusCode));
        proptest::prop_assert!(updater.storage().untouched());
    }

    #[test]
    fn prop_streams_exact_image(len in 1usize..2048, max_read in 1usize..700, extra in 0usize..64) {
        let restart = CountingRestart::default();
        let updater = updater(JournaledStorage::new(2048), &restart);
        let body = firmware_image(len + extra);
        let mut transport = ScriptedTransport::new(200)
            .with_content_length(len as u64)
            .with_body(body.clone())
            .with_max_read(max_read);

        let (outcome, events) = run_update(&updater, &mut transport);

        proptest::prop_assert_eq!(outcome, Outcome::Applied);
        proptest::prop_assert_eq!(transport.bytes_read, len);
        let storage = updater.storage();
        proptest::prop_assert_eq!(storage.memory.image(TargetKind::Executable), Some(&body[..len]));
        let last_progress = events.iter().rev().find_map(|e| match e {
            UpdateEvent::Progress { written, total } => Some((*written, *total)),
            _ => None,
        });
        proptest::prop_assert_eq!(last_progress, Some((len as u64, len as u64)));
    }
}
