//! Main update function - the session status table
//!
//! Every transition in the session lifecycle lives here:
//!
//! - `Disconnected`/`Error` + Connect → `Connecting` (attempt spawned)
//! - `Connecting` + attempt failure → `Error`
//! - `Connecting` + handshake complete → `Connected` (pipeline launched)
//! - `Connected` + playback ready → `Streaming` (the only path there)
//! - `Streaming` + playback error → `Connected`, resources kept
//! - pipeline failure → `Error`, or a relaunch when configured
//! - Disconnect/Quit from anywhere → full teardown, `Disconnected`
//!
//! Progress messages carry the [`AttemptId`] of the generation that produced
//! them; anything from a torn-down generation is dropped here.

use quadlink_core::events::{PipelineEvent, PlaybackEvent, TranscodeOutcome};
use quadlink_core::prelude::*;
use quadlink_core::types::SessionStatus;
use quadlink_drone::{CommandChannel, TranscodePipeline};

use crate::message::Message;
use crate::state::{AttemptId, ConnState};

use super::{UpdateAction, UpdateResult};

/// Process a message and update state.
/// Returns optional follow-up message and/or action.
pub fn update(state: &mut ConnState, message: Message) -> UpdateResult {
    match message {
        Message::Connect => handle_connect(state),

        Message::Disconnect => handle_disconnect(state),

        Message::Quit => {
            info!("quit requested, tearing down");
            state.request_quit();
            state.teardown();
            state.status = SessionStatus::Disconnected;
            UpdateResult::none()
        }

        Message::ConnectAttemptFailed { attempt, error } => {
            handle_attempt_failed(state, attempt, error)
        }

        Message::HandshakeComplete { attempt, channel } => {
            handle_handshake_complete(state, attempt, channel)
        }

        Message::PipelineLaunched { attempt, pipeline } => {
            handle_pipeline_launched(state, attempt, pipeline)
        }

        Message::PipelineLaunchFailed { attempt, error } => {
            if !state.is_current(attempt) {
                debug!("ignoring launch failure from stale attempt {attempt}");
                return UpdateResult::none();
            }
            error!("transcode pipeline launch failed: {error}");
            state.teardown();
            state.set_error(error);
            UpdateResult::none()
        }

        Message::Pipeline { attempt, event } => handle_pipeline_event(state, attempt, event),

        Message::Playback { attempt, event } => handle_playback_event(state, attempt, event),

        Message::DeviceReply { from, payload } => {
            // The SDK handshake is fire-and-wait; replies are informational.
            debug!("device {from} replied: {payload:?}");
            UpdateResult::none()
        }
    }
}

/// Connect is only honored at rest. While an attempt or session is live the
/// operator has to disconnect first.
fn handle_connect(state: &mut ConnState) -> UpdateResult {
    if !matches!(
        state.status,
        SessionStatus::Disconnected | SessionStatus::Error(_)
    ) {
        warn!("connect ignored while {}", state.status);
        return UpdateResult::none();
    }

    let (attempt, cancel_rx) = state.begin_attempt();
    state.status = SessionStatus::Connecting;
    info!("connect attempt {attempt} starting");
    UpdateResult::action(UpdateAction::ConnectAttempt { attempt, cancel_rx })
}

fn handle_disconnect(state: &mut ConnState) -> UpdateResult {
    if state.status == SessionStatus::Disconnected {
        debug!("disconnect ignored, already disconnected");
        return UpdateResult::none();
    }

    info!("disconnecting");
    state.teardown();
    state.status = SessionStatus::Disconnected;
    UpdateResult::none()
}

fn handle_attempt_failed(state: &mut ConnState, attempt: AttemptId, error: String) -> UpdateResult {
    if !state.is_current(attempt) {
        debug!("ignoring failure from stale attempt {attempt}");
        return UpdateResult::none();
    }

    warn!("connect attempt {attempt} failed: {error}");
    state.teardown();
    state.set_error(error);
    UpdateResult::none()
}

/// The link is up. Take ownership of the channel and launch the pipeline.
fn handle_handshake_complete(
    state: &mut ConnState,
    attempt: AttemptId,
    channel: CommandChannel,
) -> UpdateResult {
    if !state.is_current(attempt) {
        debug!("closing channel from stale attempt {attempt}");
        channel.close();
        return UpdateResult::none();
    }

    info!("attempt {attempt} handshake complete, link to {} up", channel.device_addr());
    state.channel = Some(channel);
    state.status = SessionStatus::Connected;
    UpdateResult::action(UpdateAction::LaunchPipeline { attempt })
}

fn handle_pipeline_launched(
    state: &mut ConnState,
    attempt: AttemptId,
    mut pipeline: TranscodePipeline,
) -> UpdateResult {
    if !state.is_current(attempt) {
        debug!("cancelling pipeline from stale attempt {attempt}");
        pipeline.cancel();
        return UpdateResult::none();
    }

    info!("transcode pipeline {} attached (pid {:?})", pipeline.id(), pipeline.pid());
    state.pipeline = Some(pipeline);
    UpdateResult::none()
}

fn handle_pipeline_event(
    state: &mut ConnState,
    attempt: AttemptId,
    event: PipelineEvent,
) -> UpdateResult {
    if !state.is_current(attempt) {
        debug!("ignoring pipeline event from stale attempt {attempt}");
        return UpdateResult::none();
    }

    match event {
        PipelineEvent::Stderr(line) => {
            trace!("transcoder: {line}");
            UpdateResult::none()
        }
        PipelineEvent::Exited { outcome } => handle_pipeline_exit(state, attempt, outcome),
    }
}

/// The transcoder reached its terminal outcome while the connection is live.
///
/// A clean or cancelled exit just ends the video; the link stays up. A
/// failure either consumes the relaunch budget or fails the session.
fn handle_pipeline_exit(
    state: &mut ConnState,
    attempt: AttemptId,
    outcome: TranscodeOutcome,
) -> UpdateResult {
    state.pipeline = None;

    match outcome {
        TranscodeOutcome::Success | TranscodeOutcome::Cancelled => {
            warn!("transcoder exited ({}), video stopped", outcome.summary());
            if state.status == SessionStatus::Streaming {
                state.status = SessionStatus::Connected;
            }
            UpdateResult::none()
        }
        TranscodeOutcome::Failed { log } => {
            let excerpt = log.lines().next().unwrap_or("no output").to_string();
            let pipeline = &state.config.pipeline;

            if pipeline.restart_on_runtime_failure && state.restarts_used < pipeline.max_restarts {
                state.restarts_used += 1;
                warn!(
                    "transcoder failed ({excerpt}), relaunching ({}/{})",
                    state.restarts_used, pipeline.max_restarts
                );
                if state.status == SessionStatus::Streaming {
                    state.status = SessionStatus::Connected;
                }
                return UpdateResult::action(UpdateAction::LaunchPipeline { attempt });
            }

            error!("transcoder failed: {excerpt}");
            let detail = Error::pipeline_failed(excerpt).to_string();
            state.teardown();
            state.set_error(detail);
            UpdateResult::none()
        }
    }
}

fn handle_playback_event(
    state: &mut ConnState,
    attempt: AttemptId,
    event: PlaybackEvent,
) -> UpdateResult {
    if !state.is_current(attempt) {
        debug!("ignoring playback event from stale attempt {attempt}");
        return UpdateResult::none();
    }

    match event {
        PlaybackEvent::Ready => {
            // The sole entry into Streaming. Reaching it proves the relaunch
            // worked, so the budget starts over.
            if state.status == SessionStatus::Connected {
                info!("playback ready, streaming");
                state.status = SessionStatus::Streaming;
                state.restarts_used = 0;
            } else {
                debug!("playback ready ignored while {}", state.status);
            }
        }
        PlaybackEvent::Error { detail } => {
            // Advisory: the link and pipeline stay up so playback can
            // reattach without a new handshake.
            warn!("playback error: {detail}");
            if state.status == SessionStatus::Streaming {
                state.status = SessionStatus::Connected;
            }
        }
    }

    UpdateResult::none()
}
