//! Trigger dispatch and the single-in-flight turn gate.
//!
//! [`Dispatcher`] maps hotkey [`Trigger`]s onto brain/recorder calls and
//! republishes every streamed event to the presentation channel.  The
//! defining correctness property lives here: the **TurnGate**, a one-permit
//! semaphore that guarantees at most one model round-trip is in flight.
//!
//! Gate rules:
//!
//! * Pixel and verbal turns try to take the permit; when it is held the
//!   trigger is dropped (logged, not queued).
//! * A `Talk` trigger while the recorder is actively RECORDING always
//!   passes the check — it is the stop signal for that very recording, and
//!   refusing it would deadlock voice input.  The verbal turn that may
//!   follow the stop still waits for the permit, so two turns never
//!   interleave.
//! * Model toggle, engine switch and skill swap follow the same discipline:
//!   they run only while no turn is streaming.
//!
//! Every turn — FINISH, ERROR, or a stream that died without a terminal
//! event — releases the permit (it is scoped to the turn task) and ends
//! with a READY status, so no failure can leave the system stuck.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::brain::Brain;
use crate::capture::FrameSource;
use crate::events::{EventStream, SidecarEventKind};
use crate::ingest::TranscriptWell;
use crate::recorder::{RecordingOrchestrator, RecordingState};
use crate::skills::SkillManager;
use crate::ui::{UiMessage, Vector};

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// External trigger events, one per global hotkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Capture the screen and run a vision turn.
    Pixel,
    /// Start or stop voice recording.
    Talk,
    /// Toggle the active engine's model tier.
    ToggleModel,
    /// Switch between the two engines.
    SwitchEngine,
    /// Pivot to the next installed skill.
    SkillSwap,
}

// ---------------------------------------------------------------------------
// Shared dispatch context
// ---------------------------------------------------------------------------

struct DispatchCtx {
    brain: Arc<Mutex<Brain>>,
    recorder: Arc<Mutex<RecordingOrchestrator>>,
    frames: Arc<dyn FrameSource>,
    skills: SkillManager,
    well: TranscriptWell,
    /// Cached `{{VAR}}` resolutions from the session snapshot, used when a
    /// hotkey pivot needs them and nobody is around to ask.
    placeholders: HashMap<String, String>,
    current_skill: StdMutex<String>,
    gate: Arc<Semaphore>,
    ui_tx: mpsc::Sender<UiMessage>,
}

impl DispatchCtx {
    async fn ui(&self, msg: UiMessage) {
        let _ = self.ui_tx.send(msg).await;
    }

    async fn status(&self, text: impl Into<String>) {
        self.ui(UiMessage::Status(text.into())).await;
    }

    async fn notice(&self, text: impl Into<String>) {
        self.ui(UiMessage::Notice(text.into())).await;
    }

    /// Forward one turn's events to the presentation channel, in order.
    ///
    /// A stream that ends without ERROR or FINISH is an implicit failure
    /// (the producing task died before its terminal event) and is surfaced
    /// as a notice so the user is not left staring at a half-rendered turn.
    async fn forward_stream(&self, mut stream: EventStream) {
        let mut saw_terminal = false;

        while let Some(event) = stream.recv().await {
            match event.kind {
                SidecarEventKind::TextChunk => {
                    let is_thought = event.is_thought();
                    self.ui(UiMessage::Chunk {
                        text: event.content.unwrap_or_default(),
                        is_thought,
                    })
                    .await;
                }
                SidecarEventKind::Status => {
                    self.status(event.content.unwrap_or_default()).await;
                }
                SidecarEventKind::Error => {
                    saw_terminal = true;
                    let message = event.content.unwrap_or_default();
                    log::error!("turn failed: {message}");
                    self.notice(format!("Error: {message}")).await;
                }
                SidecarEventKind::Finish => {
                    saw_terminal = true;
                }
            }
        }

        if !saw_terminal {
            log::error!("turn stream ended without a terminal event");
            self.notice("Turn ended unexpectedly.").await;
        }
    }
}

/// The skill after `current` in sorted cycle order.
fn next_skill(names: &[String], current: &str) -> String {
    match names.iter().position(|n| n == current) {
        Some(idx) => names[(idx + 1) % names.len()].clone(),
        None => names[0].clone(),
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Owns the turn gate and maps triggers onto component calls.
pub struct Dispatcher {
    ctx: Arc<DispatchCtx>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        brain: Arc<Mutex<Brain>>,
        recorder: Arc<Mutex<RecordingOrchestrator>>,
        frames: Arc<dyn FrameSource>,
        skills: SkillManager,
        well: TranscriptWell,
        placeholders: HashMap<String, String>,
        current_skill: String,
        ui_tx: mpsc::Sender<UiMessage>,
    ) -> Self {
        Self {
            ctx: Arc::new(DispatchCtx {
                brain,
                recorder,
                frames,
                skills,
                well,
                placeholders,
                current_skill: StdMutex::new(current_skill),
                gate: Arc::new(Semaphore::new(1)),
                ui_tx,
            }),
        }
    }

    /// Consume triggers until the channel closes.
    pub async fn run(self, mut triggers: mpsc::Receiver<Trigger>) {
        while let Some(trigger) = triggers.recv().await {
            self.dispatch(trigger).await;
        }
        log::info!("dispatch: trigger channel closed, shutting down");
    }

    /// Handle one trigger.  Turn work is spawned; the returned handle is
    /// `None` when the gate dropped the trigger (or nothing was spawned).
    pub async fn dispatch(&self, trigger: Trigger) -> Option<JoinHandle<()>> {
        match trigger {
            Trigger::Pixel => self.handle_pixel(),
            Trigger::Talk => self.handle_talk().await,
            Trigger::ToggleModel => {
                self.handle_toggle_model().await;
                None
            }
            Trigger::SwitchEngine => {
                self.handle_switch_engine().await;
                None
            }
            Trigger::SkillSwap => self.handle_skill_swap(),
        }
    }

    /// Vector P: screen capture + vision turn, with the transcript well as
    /// persistent supplementary context.
    fn handle_pixel(&self) -> Option<JoinHandle<()>> {
        let Ok(permit) = Arc::clone(&self.ctx.gate).try_acquire_owned() else {
            log::debug!("dispatch: turn in flight, pixel trigger dropped");
            return None;
        };

        let ctx = Arc::clone(&self.ctx);
        Some(tokio::spawn(async move {
            let _permit = permit;

            ctx.ui(UiMessage::TurnStart {
                vector: Vector::Pixel,
            })
            .await;
            ctx.status("Capturing screen...").await;

            let Some(frame) = ctx.frames.capture() else {
                ctx.notice("Capture failed.").await;
                ctx.status("READY").await;
                return;
            };

            // Persistent context: a non-clearing read.
            let extra = ctx.well.poll(false);

            let stream = {
                let mut brain = ctx.brain.lock().await;
                ctx.status(format!("Analyzing view ({})...", brain.model_name()))
                    .await;
                brain.analyze_image_stream(Some(frame), &extra)
            };

            ctx.forward_stream(stream).await;
            ctx.status("READY").await;
        }))
    }

    /// Vector T: recording toggle, then a verbal turn when a transcript
    /// came back.
    async fn handle_talk(&self) -> Option<JoinHandle<()>> {
        // Stop-signal bypass: while the recorder is RECORDING this trigger
        // must pass even though a turn may hold the gate.
        let recording = self.ctx.recorder.lock().await.is_recording();

        let permit = if recording {
            None
        } else {
            match Arc::clone(&self.ctx.gate).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    log::debug!("dispatch: turn in flight, talk trigger dropped");
                    return None;
                }
            }
        };

        let ctx = Arc::clone(&self.ctx);
        Some(tokio::spawn(async move {
            let (state, text) = ctx.recorder.lock().await.toggle().await;

            match state {
                RecordingState::Recording => {
                    // Recording holds no permit: pixel turns stay possible
                    // while the microphone is open.
                    drop(permit);
                    ctx.ui(UiMessage::Recording(true)).await;
                    ctx.status("RECORDING...").await;
                }
                RecordingState::Idle => {
                    ctx.ui(UiMessage::Recording(false)).await;

                    let Some(text) = text else {
                        ctx.status("No input detected.").await;
                        ctx.status("READY").await;
                        return;
                    };

                    // Serialize behind any in-flight turn before streaming.
                    let _permit = match permit {
                        Some(permit) => permit,
                        None => match Arc::clone(&ctx.gate).acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return, // gate closed: shutting down
                        },
                    };

                    ctx.ui(UiMessage::TurnStart {
                        vector: Vector::Talk,
                    })
                    .await;

                    let preview: String = text.chars().take(30).collect();
                    let stream = {
                        let mut brain = ctx.brain.lock().await;
                        ctx.status(format!("Processing intent: {preview}...")).await;
                        brain.analyze_verbal_stream(&text)
                    };

                    ctx.forward_stream(stream).await;
                    ctx.status("READY").await;
                }
                RecordingState::Processing => {
                    // toggle() never returns this.
                }
            }
        }))
    }

    /// Flip the active engine's model tier.  Allowed only while idle.
    async fn handle_toggle_model(&self) {
        let Ok(_permit) = self.ctx.gate.try_acquire() else {
            log::debug!("dispatch: turn in flight, model toggle dropped");
            return;
        };

        let name = {
            let mut brain = self.ctx.brain.lock().await;
            brain.toggle_model();
            brain.model_name()
        };
        log::info!("dispatch: active model is now {name}");
        self.ctx
            .status(format!("Switched model to {name} (chat reset)"))
            .await;
    }

    /// Swap the active engine.  Allowed only while idle.
    async fn handle_switch_engine(&self) {
        let Ok(_permit) = self.ctx.gate.try_acquire() else {
            log::debug!("dispatch: turn in flight, engine switch dropped");
            return;
        };

        let (msg, name) = {
            let mut brain = self.ctx.brain.lock().await;
            (brain.switch_engine(), brain.model_name())
        };
        log::info!("dispatch: {msg}");
        self.ctx.status(format!("{msg} ({name})")).await;
    }

    /// Pivot to the next installed skill (sorted cycle order — there is no
    /// menu on a hotkey path).
    fn handle_skill_swap(&self) -> Option<JoinHandle<()>> {
        let Ok(permit) = Arc::clone(&self.ctx.gate).try_acquire_owned() else {
            log::debug!("dispatch: turn in flight, skill swap dropped");
            return None;
        };

        let ctx = Arc::clone(&self.ctx);
        Some(tokio::spawn(async move {
            let _permit = permit;

            let names = ctx.skills.list_skills();
            if names.is_empty() {
                ctx.status("No skills installed.").await;
                return;
            }

            let current = ctx.current_skill.lock().unwrap().clone();
            let next = next_skill(&names, &current);

            let (mut data, required) = match ctx.skills.load(&next) {
                Ok(loaded) => loaded,
                Err(e) => {
                    ctx.notice(format!("Could not load skill '{next}': {e}")).await;
                    return;
                }
            };

            // Placeholders must be fully resolved before assembly; without
            // an interactive prompt the snapshot cache is the only source.
            let unresolved: Vec<&String> = required
                .iter()
                .filter(|name| !ctx.placeholders.contains_key(*name))
                .collect();
            if !unresolved.is_empty() {
                ctx.status(format!(
                    "Skill '{next}' needs values for {unresolved:?} - pivot skipped."
                ))
                .await;
                return;
            }

            ctx.skills.apply_placeholders(&mut data, &ctx.placeholders);
            let prompt = ctx.skills.assemble_prompt(&data);

            ctx.ui(UiMessage::TurnStart {
                vector: Vector::System,
            })
            .await;
            ctx.status(format!("Pivoting to '{next}'...")).await;

            let stream = ctx.brain.lock().await.pivot_skill(data, &prompt);
            ctx.forward_stream(stream).await;

            *ctx.current_skill.lock().unwrap() = next;
            ctx.status("READY").await;
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockAudioSource;
    use crate::brain::ENGINE_GEMINI;
    use crate::capture::MockFrameSource;
    use crate::engine::{ChatEngine, HistoryTurn, ModelTier};
    use crate::events::{event_channel, SidecarEvent};
    use crate::skills::SkillData;
    use crate::transcription::MockTranscriber;
    use tempfile::tempdir;

    /// Engine whose turns stay open until the test releases them.
    struct GatedEngine {
        release: Arc<Semaphore>,
        fail: bool,
        analysis_calls: Arc<StdMutex<usize>>,
    }

    impl GatedEngine {
        fn new(fail: bool) -> (Self, Arc<Semaphore>, Arc<StdMutex<usize>>) {
            let release = Arc::new(Semaphore::new(0));
            let calls = Arc::new(StdMutex::new(0));
            (
                Self {
                    release: Arc::clone(&release),
                    fail,
                    analysis_calls: Arc::clone(&calls),
                },
                release,
                calls,
            )
        }

        fn gated_stream(&self) -> EventStream {
            let release = Arc::clone(&self.release);
            let fail = self.fail;
            let (tx, rx) = event_channel();
            tokio::spawn(async move {
                let Ok(permit) = release.acquire_owned().await else {
                    return;
                };
                // Consume the release permit; each turn needs its own.
                permit.forget();
                if fail {
                    let _ = tx.send(SidecarEvent::error("scripted failure")).await;
                } else {
                    let _ = tx.send(SidecarEvent::text("done")).await;
                    let _ = tx.send(SidecarEvent::finish()).await;
                }
            });
            rx
        }
    }

    impl ChatEngine for GatedEngine {
        fn init_session(&mut self, _system_prompt: &str) {}
        fn add_user_message(&mut self, _content: &str) {}

        fn stream_analysis(&mut self, _image: Option<Vec<u8>>, _text: &str) -> EventStream {
            *self.analysis_calls.lock().unwrap() += 1;
            self.gated_stream()
        }

        fn stream_pivot(&mut self, _skill: &SkillData, _prompt: &str) -> EventStream {
            self.gated_stream()
        }

        fn stream_completion(&mut self) -> Option<EventStream> {
            None
        }

        fn model_name(&self) -> String {
            "GATED".into()
        }

        fn toggle_model(&mut self) -> ModelTier {
            ModelTier::Fast
        }

        fn history_snapshot(&self) -> Vec<HistoryTurn> {
            Vec::new()
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        recorder: Arc<Mutex<RecordingOrchestrator>>,
        release: Arc<Semaphore>,
        analysis_calls: Arc<StdMutex<usize>>,
        ui_rx: mpsc::Receiver<UiMessage>,
        _skills_dir: tempfile::TempDir,
    }

    fn harness_with(fail: bool, transcript: Option<&str>) -> Harness {
        let (engine, release, analysis_calls) = GatedEngine::new(fail);
        let brain = Arc::new(Mutex::new(
            Brain::new(Some(Box::new(engine)), None, ENGINE_GEMINI).unwrap(),
        ));

        let stt = match transcript {
            Some(text) => MockTranscriber::some(text),
            None => MockTranscriber::none(),
        };
        let recorder = Arc::new(Mutex::new(RecordingOrchestrator::new(
            Box::new(MockAudioSource::with_buffer(b"wav".to_vec())),
            Arc::new(stt),
        )));

        let skills_dir = tempdir().unwrap();
        let well_path = skills_dir.path().join("transcription.txt");
        let (ui_tx, ui_rx) = mpsc::channel(256);

        let dispatcher = Dispatcher::new(
            Arc::clone(&brain),
            Arc::clone(&recorder),
            Arc::new(MockFrameSource::with_frame(b"png".to_vec())),
            SkillManager::new(skills_dir.path().join("skills")),
            TranscriptWell::new(well_path),
            HashMap::new(),
            "default".into(),
            ui_tx,
        );

        Harness {
            dispatcher,
            recorder,
            release,
            analysis_calls,
            ui_rx,
            _skills_dir: skills_dir,
        }
    }

    async fn drain_ui(rx: &mut mpsc::Receiver<UiMessage>) -> Vec<UiMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn pixel_trigger_is_dropped_while_a_turn_is_in_flight() {
        let h = harness_with(false, None);

        let first = h.dispatcher.dispatch(Trigger::Pixel).await;
        assert!(first.is_some());

        // Gate is held by the open turn: the second trigger is dropped.
        let second = h.dispatcher.dispatch(Trigger::Pixel).await;
        assert!(second.is_none());

        h.release.add_permits(1);
        first.unwrap().await.unwrap();
        assert_eq!(*h.analysis_calls.lock().unwrap(), 1);

        // Gate released after the turn: a new pixel turn is admitted.
        let third = h.dispatcher.dispatch(Trigger::Pixel).await;
        assert!(third.is_some());
        h.release.add_permits(1);
        third.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn error_turn_still_releases_the_gate() {
        let mut h = harness_with(true, None);

        let first = h.dispatcher.dispatch(Trigger::Pixel).await.unwrap();
        h.release.add_permits(1);
        first.await.unwrap();

        let messages = drain_ui(&mut h.ui_rx).await;
        assert!(messages
            .iter()
            .any(|m| matches!(m, UiMessage::Notice(n) if n.contains("scripted failure"))));
        // READY was republished even though the turn errored.
        assert!(messages
            .iter()
            .any(|m| matches!(m, UiMessage::Status(s) if s == "READY")));

        // And the gate is free again.
        assert!(h.dispatcher.dispatch(Trigger::Pixel).await.is_some());
        h.release.add_permits(1);
    }

    #[tokio::test]
    async fn talk_start_is_dropped_while_a_turn_is_in_flight() {
        let h = harness_with(false, Some("hello"));

        let pixel = h.dispatcher.dispatch(Trigger::Pixel).await.unwrap();

        // Recorder idle + gate held: the start-recording trigger is dropped.
        assert!(h.dispatcher.dispatch(Trigger::Talk).await.is_none());
        assert!(h.recorder.lock().await.is_idle());

        h.release.add_permits(1);
        pixel.await.unwrap();
    }

    #[tokio::test]
    async fn talk_stop_bypasses_the_gate_while_recording() {
        let mut h = harness_with(false, Some("stop and ship"));

        // 1. Start recording (gate free, released right after the start).
        let start = h.dispatcher.dispatch(Trigger::Talk).await.unwrap();
        start.await.unwrap();
        assert!(h.recorder.lock().await.is_recording());

        // 2. A pixel turn begins while the microphone is open.
        let pixel = h.dispatcher.dispatch(Trigger::Pixel).await.unwrap();

        // 3. The stop trigger must pass even though the gate is held.
        let stop = h.dispatcher.dispatch(Trigger::Talk).await;
        assert!(stop.is_some(), "stop signal must never be gated out");
        let stop = stop.unwrap();

        // The recording stops promptly; the verbal stream waits its turn.
        for _ in 0..100 {
            if !h.recorder.lock().await.is_recording() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(!h.recorder.lock().await.is_recording());

        // 4. Release both turns (pixel first, then the queued verbal turn).
        h.release.add_permits(2);
        pixel.await.unwrap();
        stop.await.unwrap();

        let messages = drain_ui(&mut h.ui_rx).await;
        assert!(messages.contains(&UiMessage::Recording(false)));
        assert!(messages.contains(&UiMessage::TurnStart {
            vector: Vector::Talk
        }));
        // Both the pixel and the verbal turn ran.
        assert_eq!(*h.analysis_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn silent_recording_reports_no_input_and_frees_the_gate() {
        let mut h = harness_with(false, None);

        h.dispatcher.dispatch(Trigger::Talk).await.unwrap().await.unwrap();
        h.dispatcher.dispatch(Trigger::Talk).await.unwrap().await.unwrap();

        let messages = drain_ui(&mut h.ui_rx).await;
        assert!(messages
            .iter()
            .any(|m| matches!(m, UiMessage::Status(s) if s == "No input detected.")));
        // No verbal turn was started.
        assert_eq!(*h.analysis_calls.lock().unwrap(), 0);

        // Gate stayed free throughout.
        assert!(h.dispatcher.dispatch(Trigger::Pixel).await.is_some());
        h.release.add_permits(1);
    }

    #[tokio::test]
    async fn model_toggle_is_dropped_while_a_turn_is_in_flight() {
        let mut h = harness_with(false, None);

        let pixel = h.dispatcher.dispatch(Trigger::Pixel).await.unwrap();
        h.dispatcher.dispatch(Trigger::ToggleModel).await;

        h.release.add_permits(1);
        pixel.await.unwrap();

        let messages = drain_ui(&mut h.ui_rx).await;
        // The toggle produced no status while gated.
        assert!(!messages
            .iter()
            .any(|m| matches!(m, UiMessage::Status(s) if s.contains("Switched model"))));

        // Idle again: the toggle goes through.
        h.dispatcher.dispatch(Trigger::ToggleModel).await;
        let messages = drain_ui(&mut h.ui_rx).await;
        assert!(messages
            .iter()
            .any(|m| matches!(m, UiMessage::Status(s) if s.contains("Switched model"))));
    }

    #[tokio::test]
    async fn engine_switch_reports_failure_with_single_engine() {
        let mut h = harness_with(false, None);

        h.dispatcher.dispatch(Trigger::SwitchEngine).await;
        let messages = drain_ui(&mut h.ui_rx).await;
        assert!(messages
            .iter()
            .any(|m| matches!(m, UiMessage::Status(s) if s.contains("cannot switch"))));
    }

    #[tokio::test]
    async fn skill_swap_with_no_skills_reports_and_releases() {
        let mut h = harness_with(false, None);

        let swap = h.dispatcher.dispatch(Trigger::SkillSwap).await.unwrap();
        swap.await.unwrap();

        let messages = drain_ui(&mut h.ui_rx).await;
        assert!(messages
            .iter()
            .any(|m| matches!(m, UiMessage::Status(s) if s == "No skills installed.")));

        // Gate released.
        assert!(h.dispatcher.dispatch(Trigger::Pixel).await.is_some());
        h.release.add_permits(1);
    }

    #[test]
    fn next_skill_cycles_in_sorted_order() {
        let names = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
        assert_eq!(next_skill(&names, "alpha"), "beta");
        assert_eq!(next_skill(&names, "gamma"), "alpha");
        // Unknown current lands on the first skill.
        assert_eq!(next_skill(&names, "missing"), "alpha");
    }
}
