//! Turn execution: ordering, single-flight, stopping policy and fallbacks.

use crate::helpers::{
    Harness, Script, ScriptedRetriever, SpeechCall, downloaded_model, test_config, wait_for_state,
};
use std::sync::atomic::Ordering;
use voxchat::pipeline::StopReason;
use voxchat::{AppPhase, ChatEvent, DropReason, TurnOrigin, TurnOutcome};

fn drain(rx: &mut tokio::sync::broadcast::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn short_reply_is_not_stopped_early() {
    let h = Harness::ready().await;
    h.backend.push(Script::Tokens(vec!["Hi", " there", "!"]));
    let mut events = h.coordinator.subscribe_events();

    let outcome = h.coordinator.submit_turn("Hello", TurnOrigin::Typed).await;

    assert_eq!(outcome, TurnOutcome::Completed { fallback: false });
    let state = h.state();
    let reply = state.messages.last().unwrap();
    assert_eq!(reply.text, "Hi there!");
    assert!(!reply.is_user);
    assert!(!reply.has_context);
    assert!(!state.is_generating);
    assert_eq!(h.backend.prompts(), ["Hello"]);
    assert!(
        !drain(&mut events)
            .iter()
            .any(|e| matches!(e, ChatEvent::GenerationStopped { .. }))
    );
}

#[tokio::test]
async fn user_message_is_observed_before_generation_and_reply() {
    let h = Harness::ready().await;
    h.backend.push(Script::Tokens(vec!["Answer."]));
    let mut events = h.coordinator.subscribe_events();

    h.coordinator.submit_turn("Question", TurnOrigin::Typed).await;

    let events = drain(&mut events);
    let position = |pred: &dyn Fn(&ChatEvent) -> bool| events.iter().position(pred).unwrap();
    let user = position(&|e| matches!(e, ChatEvent::MessageAppended { message, .. } if message.is_user));
    let started = position(&|e| matches!(e, ChatEvent::GenerationStarted { .. }));
    let reply = position(&|e| matches!(e, ChatEvent::MessageAppended { message, .. } if !message.is_user));
    let finished = position(&|e| matches!(e, ChatEvent::GenerationFinished { .. }));
    assert!(user < started);
    assert!(started < reply);
    assert!(reply <= finished);
}

#[tokio::test]
async fn user_message_visible_while_generating() {
    let h = Harness::ready().await;
    h.backend.hold();
    let coordinator = h.coordinator.clone();
    let turn = tokio::spawn(async move { coordinator.submit_turn("Are you there?", TurnOrigin::Typed).await });

    let state = wait_for_state(&h.coordinator, |s| s.is_generating).await;
    let last = state.messages.last().unwrap();
    assert!(last.is_user);
    assert_eq!(last.text, "Are you there?");
    assert!(state.active_session_id.is_some());

    h.backend.release();
    assert_eq!(turn.await.unwrap(), TurnOutcome::Completed { fallback: false });
}

#[tokio::test]
async fn concurrent_submission_is_dropped_not_queued() {
    let h = Harness::ready().await;
    h.backend.hold();
    h.backend.push(Script::Tokens(vec!["First answer."]));

    let coordinator = h.coordinator.clone();
    let first = tokio::spawn(async move { coordinator.submit_turn("first", TurnOrigin::Typed).await });
    wait_for_state(&h.coordinator, |s| s.is_generating).await;

    let second = h.coordinator.submit_turn("second", TurnOrigin::Typed).await;
    assert_eq!(second, TurnOutcome::Dropped(DropReason::Busy));

    h.backend.release();
    assert_eq!(first.await.unwrap(), TurnOutcome::Completed { fallback: false });

    let state = h.state();
    let texts: Vec<&str> = state.messages.iter().skip(1).map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["first", "First answer."]);
    assert_eq!(h.backend.prompts().len(), 1);
}

#[tokio::test]
async fn shutdown_mid_turn_appends_and_speaks_nothing() {
    let h = Harness::ready().await;
    h.coordinator.toggle_voice_mode();
    h.backend.hold();
    h.backend.push(Script::Tokens(vec!["Never", " shown."]));
    let coordinator = h.coordinator.clone();
    let turn = tokio::spawn(async move { coordinator.submit_turn("Still there?", TurnOrigin::Typed).await });
    wait_for_state(&h.coordinator, |s| s.is_generating).await;

    h.coordinator.shutdown().await;
    h.backend.release();

    assert_eq!(turn.await.unwrap(), TurnOutcome::Cancelled);
    let state = h.state();
    assert!(!state.is_generating);
    let last = state.messages.last().unwrap();
    assert!(last.is_user);
    assert_eq!(last.text, "Still there?");
    assert!(!h.speech.calls().iter().any(|c| matches!(c, SpeechCall::Speak(_))));
}

#[tokio::test]
async fn repeated_phrase_stops_consumption() {
    let h = Harness::ready().await;
    let phrase = [
        " the", " cat", " sat", " on", " a", " warm", " red", " mat", " all", " day",
    ];
    let mut tokens: Vec<&'static str> = phrase.iter().chain(phrase.iter()).copied().collect();
    tokens.extend([" extra", " tokens", " never", " read"]);
    h.backend.push(Script::Tokens(tokens));
    let mut events = h.coordinator.subscribe_events();

    h.coordinator.submit_turn("Tell me a story", TurnOrigin::Typed).await;

    assert_eq!(h.backend.pulled.load(Ordering::SeqCst), 20);
    let reply = h.state().messages.last().unwrap().clone();
    assert!(!reply.text.contains("extra"));
    assert!(reply.text.ends_with("all day"));
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ChatEvent::GenerationStopped {
            reason: StopReason::Repetition
        }
    )));
}

#[tokio::test]
async fn identical_word_run_stops_generation() {
    let h = Harness::ready().await;
    h.backend.push(Script::Tokens(vec![
        "Here is what I think about it:",
        " yes",
        " yes",
        " yes",
        " yes",
        " yes",
        " and more",
    ]));

    h.coordinator.submit_turn("Well?", TurnOrigin::Typed).await;

    let reply = h.state().messages.last().unwrap().text.clone();
    assert!(reply.ends_with("yes yes yes yes yes"));
    assert_eq!(h.backend.pulled.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn endless_stream_stops_at_character_ceiling() {
    let h = Harness::ready().await;
    h.backend.push(Script::EndlessWords);
    let mut events = h.coordinator.subscribe_events();

    let outcome = h.coordinator.submit_turn("Count forever", TurnOrigin::Typed).await;

    assert_eq!(outcome, TurnOutcome::Completed { fallback: false });
    let reply = h.state().messages.last().unwrap().text.clone();
    let chars = reply.chars().count();
    // The leading space of the first token is trimmed away.
    assert!((999..1005).contains(&chars), "reply had {chars} chars");
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ChatEvent::GenerationStopped {
            reason: StopReason::LengthLimit
        }
    )));
}

#[tokio::test]
async fn endless_stream_stops_at_token_ceiling() {
    let mut config = test_config();
    config.generation.max_chars = 100_000;
    let h = Harness::ready_with(config, ScriptedRetriever::failing("unused")).await;
    h.backend.push(Script::EndlessChar);

    h.coordinator.submit_turn("Say x", TurnOrigin::Typed).await;

    assert_eq!(h.backend.pulled.load(Ordering::SeqCst), 500);
    assert_eq!(h.state().messages.last().unwrap().text.len(), 500);
}

#[tokio::test]
async fn generation_error_appends_labelled_fallback() {
    let h = Harness::ready().await;
    h.backend.push(Script::Refuse);

    let outcome = h.coordinator.submit_turn("Why?", TurnOrigin::Typed).await;

    assert_eq!(outcome, TurnOutcome::Completed { fallback: true });
    let state = h.state();
    let reply = state.messages.last().unwrap();
    assert!(reply.text.starts_with("[fallback]"));
    assert!(reply.text.contains("\"Why?\""));
    assert!(!reply.has_context);
    assert!(!state.is_generating);
    assert_eq!(state.status_text, state.text_config.error);
}

#[tokio::test]
async fn mid_stream_error_and_empty_output_fall_back() {
    let h = Harness::ready().await;
    h.backend.push(Script::FailAfter(vec!["Partial"]));
    h.backend.push(Script::Tokens(vec!["  ", "\n"]));

    let broken = h.coordinator.submit_turn("one", TurnOrigin::Typed).await;
    let empty = h.coordinator.submit_turn("two", TurnOrigin::Typed).await;

    assert_eq!(broken, TurnOutcome::Completed { fallback: true });
    assert_eq!(empty, TurnOutcome::Completed { fallback: true });
    let state = h.state();
    let replies: Vec<_> = state.messages.iter().filter(|m| !m.is_user).skip(1).collect();
    assert_eq!(replies.len(), 2);
    assert!(replies.iter().all(|m| m.text.starts_with("[fallback]")));

    // The session stays usable.
    h.backend.push(Script::Tokens(vec!["Fine now."]));
    let outcome = h.coordinator.submit_turn("three", TurnOrigin::Typed).await;
    assert_eq!(outcome, TurnOutcome::Completed { fallback: false });
}

#[tokio::test]
async fn retrieval_failure_uses_plain_prompt() {
    let mut config = test_config();
    config.retrieval.enabled = true;
    let h = Harness::ready_with(config, ScriptedRetriever::failing("service down")).await;
    h.backend.push(Script::Tokens(vec!["Plain answer."]));

    let outcome = h.coordinator.submit_turn("Latest news?", TurnOrigin::Typed).await;

    assert_eq!(outcome, TurnOutcome::Completed { fallback: false });
    assert_eq!(h.backend.prompts(), ["Latest news?"]);
    let state = h.state();
    let reply = state.messages.last().unwrap();
    assert_eq!(reply.text, "Plain answer.");
    assert!(!reply.has_context);
    assert_eq!(state.retrieval_status.as_deref(), Some("Online search unavailable"));

    let queries = h.retriever.queries();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].0.starts_with("ai_user_"));
    assert_eq!(queries[0].1, "Latest news?");
}

#[tokio::test]
async fn blank_retrieval_result_is_not_context() {
    let mut config = test_config();
    config.retrieval.enabled = true;
    let h = Harness::ready_with(config, ScriptedRetriever::answering("   ")).await;

    h.coordinator.submit_turn("Anything?", TurnOrigin::Typed).await;

    assert_eq!(h.backend.prompts(), ["Anything?"]);
    assert!(!h.state().messages.last().unwrap().has_context);
    assert_eq!(h.state().retrieval_status.as_deref(), Some("No online data found"));
}

#[tokio::test]
async fn retrieved_context_is_prepended_and_flagged() {
    let mut config = test_config();
    config.retrieval.enabled = true;
    let h = Harness::ready_with(config, ScriptedRetriever::answering("Rust 1.85 shipped.")).await;
    h.backend.push(Script::Tokens(vec!["It shipped."]));

    h.coordinator.submit_turn("What shipped?", TurnOrigin::Typed).await;

    let prompt = &h.backend.prompts()[0];
    let context_at = prompt.find("Rust 1.85 shipped.").unwrap();
    let question_at = prompt.find("What shipped?").unwrap();
    assert!(context_at < question_at);
    let state = h.state();
    assert!(state.messages.last().unwrap().has_context);
    assert_eq!(state.retrieval_status.as_deref(), Some("Enhanced with online data"));
}

#[tokio::test]
async fn turns_are_dropped_until_ready() {
    let h = Harness::new(test_config(), vec![downloaded_model()], ScriptedRetriever::failing("unused"));

    let outcome = h.coordinator.submit_turn("Hello?", TurnOrigin::Typed).await;

    assert_eq!(outcome, TurnOutcome::Dropped(DropReason::NotReady));
    let state = h.state();
    assert_eq!(state.phase, AppPhase::Initializing);
    assert_eq!(state.status_text, "AI assistant not ready. Please wait...");
    assert!(state.sessions.is_empty());
    assert!(h.backend.prompts().is_empty());
}

#[tokio::test]
async fn turn_without_session_is_deferred() {
    let h = Harness::new(test_config(), vec![downloaded_model()], ScriptedRetriever::failing("unused"));
    h.coordinator.refresh_models().await.unwrap();
    h.coordinator.select_model("general-1b").await.unwrap();
    assert!(h.state().active_session_id.is_none());

    let outcome = h.coordinator.submit_turn("Hi", TurnOrigin::Typed).await;

    assert_eq!(outcome, TurnOutcome::Deferred);
    let state = h.state();
    assert!(state.active_session_id.is_some());
    assert!(state.messages.iter().all(|m| !m.is_user));
    assert!(h.backend.prompts().is_empty());
}

#[tokio::test]
async fn blank_input_is_ignored() {
    let h = Harness::ready().await;
    let before = h.state().messages.len();
    let outcome = h.coordinator.submit_turn("   \n", TurnOrigin::Typed).await;
    assert_eq!(outcome, TurnOutcome::Dropped(DropReason::EmptyInput));
    assert_eq!(h.state().messages.len(), before);
}

#[tokio::test]
async fn deleting_active_session_opens_a_new_one() {
    let h = Harness::ready().await;
    h.coordinator.submit_turn("Remember this", TurnOrigin::Typed).await;
    let old = h.state().active_session_id.unwrap();

    h.coordinator.delete_session(&old).unwrap();

    let state = h.state();
    let new = state.active_session_id.clone().unwrap();
    assert_ne!(new, old);
    assert!(state.messages.iter().all(|m| !m.is_user));
    assert_eq!(state.sessions.len(), 1);
    assert_eq!(state.sessions[0].id, new);
    assert_eq!(state.sessions[0].title, "New Chat");
}

#[tokio::test]
async fn session_list_tracks_titles_and_order() {
    let h = Harness::ready().await;
    let first = h.state().active_session_id.unwrap();
    h.coordinator.submit_turn("What is ownership?", TurnOrigin::Typed).await;

    let second = h.coordinator.start_new_session();
    h.coordinator.submit_turn("Explain lifetimes", TurnOrigin::Typed).await;

    let state = h.state();
    assert_eq!(state.sessions.len(), 2);
    assert!(
        state
            .sessions
            .windows(2)
            .all(|w| w[0].last_timestamp_ms >= w[1].last_timestamp_ms)
    );
    let title = |id: &str| {
        state
            .sessions
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.title.clone())
            .unwrap()
    };
    assert_eq!(title(&first), "What is ownership?");
    assert_eq!(title(&second), "Explain lifetimes");

    h.coordinator.select_session(&first).unwrap();
    h.coordinator.submit_turn("And borrowing?", TurnOrigin::Typed).await;
    let state = h.state();
    assert_eq!(state.sessions[0].id, first);
    assert_eq!(state.sessions[0].title, "What is ownership? (+1)");
}
