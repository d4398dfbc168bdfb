//! A UI thread and an audio thread sharing one running script.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use luadio::audio_snapshot::AudioSnapshot;
use luadio::config::{LockPolicy, RuntimeConfig};
use luadio::field_queue::FieldValue;
use luadio::inspector::Inspector;
use luadio::runtime::{AudioReadOutcome, ScriptRuntime, ScriptState};
use luadio::script_log;

const SCRIPT: &str = "\
[SliderFloat(0, 1)]
gain = 0.0

[Checkbox]
mute = false

frames = 0

function on_update(dt)
    frames = frames + 1
end

function on_audio_read(data, length, channels)
    local value = gain
    if mute then
        value = 0.0
    end
    for i = 0, length - 1 do
        data[i] = value
    end
end
";

fn session(policy: LockPolicy) {
    let config = RuntimeConfig {
        lock_policy: policy,
        ..RuntimeConfig::default()
    };
    let (logger, mut console) = script_log::channel(config.max_logs_per_call, config.log_history);
    let runtime = ScriptRuntime::new(config, logger).unwrap();
    let compiled = runtime.compile_and_start(SCRIPT).unwrap();

    let mut inspector = Inspector::new(runtime.field_sender());
    inspector.set_fields(compiled.fields);

    let snapshot = Arc::new(AudioSnapshot::with_capacity(64));
    let processor = runtime.processor(snapshot.clone());
    let done = Arc::new(AtomicBool::new(false));

    let audio = {
        let done = done.clone();
        thread::spawn(move || {
            let mut buffer = vec![0.0f32; 256];
            let mut last = 0.0f32;
            let mut processed = 0usize;
            while !done.load(Ordering::Acquire) {
                match processor.process(&mut buffer, 2) {
                    AudioReadOutcome::Processed => {
                        // One parameter set per block.
                        let first = buffer[0];
                        assert!(buffer.iter().all(|s| *s == first), "torn block");
                        // Edits only ever raise the gain, in order.
                        assert!(first >= last, "edit applied out of order");
                        last = first;
                        processed += 1;
                    }
                    AudioReadOutcome::Skipped => {
                        assert!(buffer.iter().all(|s| *s == 0.0));
                    }
                    other => panic!("unexpected outcome {:?}", other),
                }
            }
            (processed, last)
        })
    };

    for step in 1..=100 {
        let gain = step as f32 / 100.0;
        inspector.edit("gain", FieldValue::Float(gain)).unwrap();
        runtime.update(0.016);
        {
            let guard = snapshot.acquire();
            if let Some(first) = guard.first() {
                assert!(guard.iter().all(|s| s == first));
            }
        }
        console.poll();
        thread::sleep(Duration::from_micros(200));
    }

    // Let the audio thread drain the last edit.
    while runtime.global("gain") != Some(FieldValue::Float(1.0)) {
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(5));
    done.store(true, Ordering::Release);
    let (processed, last) = audio.join().unwrap();

    assert!(processed > 0);
    assert_eq!(last, 1.0);
    assert_eq!(runtime.global("frames"), Some(FieldValue::Int(100)));

    runtime.stop();
    assert_eq!(runtime.state(), ScriptState::Idle);
    // Edits after stop are shown but not queued.
    let edit = inspector.edit("mute", FieldValue::Bool(true)).unwrap();
    assert!(!edit.queued);

    console.poll();
    assert_eq!(console.diagnostics().count(), 0);
}

#[test]
fn test_live_session_blocking() {
    session(LockPolicy::Block);
}

#[test]
fn test_live_session_try_lock() {
    session(LockPolicy::TryLock);
}
