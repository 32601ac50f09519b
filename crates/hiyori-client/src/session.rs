use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use hiyori_core::localized_strings;
use hiyori_types::{ChatRequest, Locale, Message, Role};

use crate::reply::read_reply;
use crate::transport::{ChatTransport, TransportError};

/// Messages kept in the client-side window, greeting included.
pub const CLIENT_HISTORY_LIMIT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Idle,
    Sending,
    Streaming,
    Finalized,
    Failed,
}

#[derive(Debug)]
pub enum SendOutcome {
    /// The reply finished; `reply` is empty when no frame carried text.
    Completed { reply: String },
    /// The apology was shown and the window left as it was.
    Failed(TransportError),
    /// Another request is still in flight.
    Busy,
    /// Blank input.
    Empty,
}

/// Where a session renders its transcript.
pub trait TranscriptView: Send {
    fn push_message(&mut self, role: Role, content: &str);

    /// Opens an empty assistant bubble for the reply about to stream.
    fn begin_reply(&mut self);

    /// Receives the whole accumulated reply, never only the latest delta.
    fn render_reply(&mut self, text: &str);

    /// Typing indicator on, input disabled while `busy`.
    fn set_busy(&mut self, busy: bool);

    fn clear(&mut self);
}

struct SessionState {
    locale: Locale,
    history: Vec<Message>,
    phase: RequestPhase,
    // bumped on every reset so a reply that outlives a clear is not committed
    generation: u64,
}

pub struct ChatSession<T, V> {
    transport: T,
    view: Mutex<V>,
    state: Mutex<SessionState>,
    in_flight: AtomicBool,
}

impl<T, V> ChatSession<T, V>
where
    T: ChatTransport,
    V: TranscriptView,
{
    pub fn new(transport: T, view: V, locale: Locale) -> Self {
        let session = Self {
            transport,
            view: Mutex::new(view),
            state: Mutex::new(SessionState {
                locale,
                history: Vec::new(),
                phase: RequestPhase::Idle,
                generation: 0,
            }),
            in_flight: AtomicBool::new(false),
        };
        session.reset();
        session
    }

    pub fn locale(&self) -> Locale {
        lock(&self.state).locale
    }

    pub fn history(&self) -> Vec<Message> {
        lock(&self.state).history.clone()
    }

    pub fn phase(&self) -> RequestPhase {
        lock(&self.state).phase
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn with_view<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&lock(&self.view))
    }

    /// Empties the window and the transcript, then greets again.
    pub fn clear(&self) {
        self.reset();
    }

    /// Switches to one of the supported tags. Returns `false` for an unknown
    /// tag, which leaves the session untouched.
    pub fn set_locale(&self, tag: &str) -> bool {
        let Some(locale) = Locale::from_tag(tag) else {
            tracing::debug!("ignoring unsupported locale tag `{}`", tag);
            return false;
        };
        let untouched = {
            let mut state = lock(&self.state);
            state.locale = locale;
            !state.history.iter().any(|m| m.role == Role::User)
        };
        if untouched {
            self.reset();
        }
        true
    }

    pub async fn send(&self, input: &str) -> SendOutcome {
        let text = input.trim();
        if text.is_empty() {
            return SendOutcome::Empty;
        }
        let Some(_guard) = InFlight::acquire(self) else {
            tracing::debug!("chat request already in flight, ignoring submit");
            return SendOutcome::Busy;
        };

        let (request, generation, locale) = {
            let mut state = lock(&self.state);
            state.phase = RequestPhase::Sending;
            let mut messages = state.history.clone();
            messages.push(Message::user(text));
            let request = ChatRequest {
                messages,
                locale: Some(state.locale.as_str().to_string()),
            };
            (request, state.generation, state.locale)
        };
        {
            let mut view = lock(&self.view);
            view.push_message(Role::User, text);
            view.set_busy(true);
        }

        match self.stream_reply(&request).await {
            Ok(reply) => {
                let mut state = lock(&self.state);
                state.phase = RequestPhase::Finalized;
                if state.generation == generation {
                    state.history.push(Message::user(text));
                    if !reply.is_empty() {
                        state.history.push(Message::assistant(reply.clone()));
                    }
                    trim_history(&mut state.history);
                }
                SendOutcome::Completed { reply }
            }
            Err(err) => {
                tracing::warn!("chat request failed: {}", err);
                lock(&self.state).phase = RequestPhase::Failed;
                lock(&self.view).push_message(Role::Assistant, localized_strings(locale).error);
                SendOutcome::Failed(err)
            }
        }
    }

    async fn stream_reply(&self, request: &ChatRequest) -> Result<String, TransportError> {
        let chunks = self.transport.open(request).await?;
        lock(&self.state).phase = RequestPhase::Streaming;
        lock(&self.view).begin_reply();

        let view = &self.view;
        read_reply(chunks, |_, reply| lock(view).render_reply(reply)).await
    }

    fn reset(&self) {
        let mut state = lock(&self.state);
        let greeting = localized_strings(state.locale).initial_message;
        state.history = vec![Message::assistant(greeting)];
        state.generation += 1;
        let mut view = lock(&self.view);
        view.clear();
        view.push_message(Role::Assistant, greeting);
    }
}

fn trim_history(history: &mut Vec<Message>) {
    if history.len() > CLIENT_HISTORY_LIMIT {
        let excess = history.len() - CLIENT_HISTORY_LIMIT;
        history.drain(..excess);
    }
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the single-flight flag. Dropping it returns the session to idle and
/// re-enables input on every exit path.
struct InFlight<'a, T, V: TranscriptView> {
    session: &'a ChatSession<T, V>,
}

impl<'a, T, V> InFlight<'a, T, V>
where
    T: ChatTransport,
    V: TranscriptView,
{
    fn acquire(session: &'a ChatSession<T, V>) -> Option<Self> {
        session
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self { session })
    }
}

impl<T, V: TranscriptView> Drop for InFlight<'_, T, V> {
    fn drop(&mut self) {
        lock(&self.session.state).phase = RequestPhase::Idle;
        lock(&self.session.view).set_busy(false);
        self.session.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use async_trait::async_trait;
    use futures::StreamExt;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use tokio::sync::Notify;

    use crate::transport::ChunkStream;

    #[derive(Default)]
    struct MemoryView {
        entries: Vec<(Role, String)>,
        renders: Vec<String>,
        busy: bool,
        busy_history: Vec<bool>,
    }

    impl TranscriptView for MemoryView {
        fn push_message(&mut self, role: Role, content: &str) {
            self.entries.push((role, content.to_string()));
        }

        fn begin_reply(&mut self) {
            self.entries.push((Role::Assistant, String::new()));
        }

        fn render_reply(&mut self, text: &str) {
            self.renders.push(text.to_string());
            if let Some(last) = self.entries.last_mut() {
                last.1 = text.to_string();
            }
        }

        fn set_busy(&mut self, busy: bool) {
            self.busy = busy;
            self.busy_history.push(busy);
        }

        fn clear(&mut self) {
            self.entries.clear();
        }
    }

    #[derive(Clone)]
    enum Step {
        Chunk(Vec<u8>),
        Reset,
    }

    fn chunk(text: &str) -> Step {
        Step::Chunk(text.as_bytes().to_vec())
    }

    #[derive(Default)]
    struct ScriptedTransport {
        steps: Vec<Step>,
        reject_status: Option<StatusCode>,
        opens: AtomicUsize,
        pulled: Arc<AtomicUsize>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps,
                ..Default::default()
            }
        }

        fn rejecting(status: StatusCode) -> Self {
            Self {
                reject_status: Some(status),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn open(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            if let Some(status) = self.reject_status {
                return Err(TransportError::Status(status));
            }
            let pulled = self.pulled.clone();
            let items = self.steps.clone().into_iter().map(move |step| {
                pulled.fetch_add(1, Ordering::SeqCst);
                match step {
                    Step::Chunk(bytes) => Ok(Bytes::from(bytes)),
                    Step::Reset => Err(TransportError::Interrupted("connection reset".into())),
                }
            });
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    /// Streams a single frame once the gate is opened.
    #[derive(Default)]
    struct GatedTransport {
        gate: Arc<Notify>,
        opens: AtomicUsize,
    }

    #[async_trait]
    impl ChatTransport for GatedTransport {
        async fn open(&self, _request: &ChatRequest) -> Result<ChunkStream, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.clone();
            let first = futures::stream::once(async move {
                gate.notified().await;
                Ok(Bytes::from_static(b"data: {\"response\":\"done\"}\n\n"))
            });
            let rest = futures::stream::iter(vec![Ok(Bytes::from_static(b"data: [DONE]\n\n"))]);
            Ok(Box::pin(first.chain(rest)))
        }
    }

    fn greeting(locale: Locale) -> Message {
        Message::assistant(localized_strings(locale).initial_message)
    }

    #[test]
    fn new_session_is_greeted() {
        let session = ChatSession::new(ScriptedTransport::default(), MemoryView::default(), Locale::En);
        assert_eq!(session.history(), vec![greeting(Locale::En)]);
        assert_eq!(session.phase(), RequestPhase::Idle);
        session.with_view(|view| {
            assert_eq!(
                view.entries,
                vec![(Role::Assistant, localized_strings(Locale::En).initial_message.to_string())]
            );
        });
    }

    #[tokio::test]
    async fn accumulates_both_delta_shapes_and_skips_junk() {
        let transport = ScriptedTransport::new(vec![
            chunk("data: {\"response\":\"Hel\"}\n\n: keep-alive\n\n"),
            chunk("data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: {\"foo\":1}\n\n"),
            chunk("data: not json\n\ndata: {\"response\":\"!\"}\n\ndata: [DONE]\n\n"),
        ]);
        let session = ChatSession::new(transport, MemoryView::default(), Locale::En);

        let outcome = session.send("  hi  ").await;
        assert!(matches!(outcome, SendOutcome::Completed { ref reply } if reply == "Hello!"));

        session.with_view(|view| {
            assert_eq!(view.renders, vec!["Hel", "Hello", "Hello!"]);
            assert_eq!(view.entries.last(), Some(&(Role::Assistant, "Hello!".to_string())));
            assert_eq!(view.busy_history, vec![true, false]);
        });
        assert_eq!(
            session.history(),
            vec![greeting(Locale::En), Message::user("hi"), Message::assistant("Hello!")]
        );
        assert_eq!(session.phase(), RequestPhase::Idle);
        assert!(!session.is_processing());
    }

    #[tokio::test]
    async fn request_carries_window_and_locale() {
        let transport = ScriptedTransport::new(vec![chunk("data: [DONE]\n\n")]);
        let session = ChatSession::new(transport, MemoryView::default(), Locale::Zh);
        session.send("你好").await;

        let requests = session.transport.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].locale.as_deref(), Some("zh"));
        assert_eq!(
            requests[0].messages,
            vec![greeting(Locale::Zh), Message::user("你好")]
        );
    }

    #[tokio::test]
    async fn done_stops_reading_further_chunks() {
        let transport = ScriptedTransport::new(vec![
            chunk("data: {\"response\":\"a\"}\n\ndata: [DONE]\n\n"),
            chunk("data: {\"response\":\"b\"}\n\n"),
        ]);
        let session = ChatSession::new(transport, MemoryView::default(), Locale::En);

        let outcome = session.send("x").await;
        assert!(matches!(outcome, SendOutcome::Completed { ref reply } if reply == "a"));
        assert_eq!(session.transport.pulled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn end_of_stream_without_done_finalizes() {
        let transport = ScriptedTransport::new(vec![chunk("data: {\"response\":\"ok\"}\n\ndata: {\"resp")]);
        let session = ChatSession::new(transport, MemoryView::default(), Locale::En);

        let outcome = session.send("x").await;
        assert!(matches!(outcome, SendOutcome::Completed { ref reply } if reply == "ok"));
        assert_eq!(session.history().len(), 3);
    }

    #[tokio::test]
    async fn empty_reply_commits_only_the_user_turn() {
        let transport = ScriptedTransport::new(vec![chunk("data: {\"foo\":1}\n\ndata: [DONE]\n\n")]);
        let session = ChatSession::new(transport, MemoryView::default(), Locale::En);

        let outcome = session.send("x").await;
        assert!(matches!(outcome, SendOutcome::Completed { ref reply } if reply.is_empty()));
        assert_eq!(session.history(), vec![greeting(Locale::En), Message::user("x")]);
    }

    #[tokio::test]
    async fn multibyte_text_split_across_chunks_survives() {
        let frame = "data: {\"response\":\"日和\"}\n\ndata: [DONE]\n\n".as_bytes();
        let cut = "data: {\"response\":\"".len() + 1;
        let transport = ScriptedTransport::new(vec![
            Step::Chunk(frame[..cut].to_vec()),
            Step::Chunk(frame[cut..].to_vec()),
        ]);
        let session = ChatSession::new(transport, MemoryView::default(), Locale::Ja);

        let outcome = session.send("こんにちは").await;
        assert!(matches!(outcome, SendOutcome::Completed { ref reply } if reply == "日和"));
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let session = ChatSession::new(ScriptedTransport::default(), MemoryView::default(), Locale::En);
        assert!(matches!(session.send("   ").await, SendOutcome::Empty));
        assert_eq!(session.transport.opens.load(Ordering::SeqCst), 0);
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn second_submit_while_streaming_is_ignored() {
        let transport = GatedTransport::default();
        let gate = transport.gate.clone();
        let session = ChatSession::new(transport, MemoryView::default(), Locale::En);

        let second = async {
            tokio::task::yield_now().await;
            let phase = session.phase();
            let outcome = session.send("second").await;
            gate.notify_one();
            (phase, outcome)
        };
        let (first, (phase_seen, second)) = tokio::join!(session.send("first"), second);

        assert_eq!(phase_seen, RequestPhase::Streaming);
        assert!(matches!(second, SendOutcome::Busy));
        assert!(matches!(first, SendOutcome::Completed { ref reply } if reply == "done"));
        assert_eq!(session.transport.opens.load(Ordering::SeqCst), 1);
        assert_eq!(
            session.history(),
            vec![greeting(Locale::En), Message::user("first"), Message::assistant("done")]
        );
        assert!(!session.is_processing());
    }

    #[tokio::test]
    async fn rejected_request_leaves_clean_state() {
        let session = ChatSession::new(
            ScriptedTransport::rejecting(StatusCode::INTERNAL_SERVER_ERROR),
            MemoryView::default(),
            Locale::En,
        );
        let before = session.history();

        let outcome = session.send("hello").await;
        assert!(matches!(
            outcome,
            SendOutcome::Failed(TransportError::Status(status))
                if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert_eq!(session.history(), before);
        assert!(!session.is_processing());
        assert_eq!(session.phase(), RequestPhase::Idle);

        let apology = localized_strings(Locale::En).error;
        session.with_view(|view| {
            let apologies = view.entries.iter().filter(|(_, text)| text == apology).count();
            assert_eq!(apologies, 1);
            assert_eq!(view.entries.last(), Some(&(Role::Assistant, apology.to_string())));
            assert!(!view.busy);
        });
    }

    #[tokio::test]
    async fn mid_stream_reset_keeps_partial_bubble_and_apologizes() {
        let transport = ScriptedTransport::new(vec![
            chunk("data: {\"response\":\"partial\"}\n\n"),
            Step::Reset,
        ]);
        let session = ChatSession::new(transport, MemoryView::default(), Locale::Ja);

        let outcome = session.send("hello").await;
        assert!(matches!(outcome, SendOutcome::Failed(TransportError::Interrupted(_))));
        assert_eq!(session.history(), vec![greeting(Locale::Ja)]);
        session.with_view(|view| {
            let tail = &view.entries[view.entries.len() - 2..];
            assert_eq!(tail[0], (Role::Assistant, "partial".to_string()));
            assert_eq!(
                tail[1],
                (Role::Assistant, localized_strings(Locale::Ja).error.to_string())
            );
        });

        // the session is usable again
        assert!(session.with_view(|view| !view.busy));
        assert!(!session.is_processing());
    }

    #[tokio::test]
    async fn window_is_trimmed_to_limit() {
        let transport = ScriptedTransport::new(vec![chunk("data: {\"response\":\"ok\"}\n\ndata: [DONE]\n\n")]);
        let session = ChatSession::new(transport, MemoryView::default(), Locale::En);

        for i in 0..10 {
            session.send(&format!("turn {i}")).await;
        }
        let history = session.history();
        assert_eq!(history.len(), CLIENT_HISTORY_LIMIT);
        assert_eq!(history[0], Message::user("turn 2"));
        assert_eq!(history[15], Message::assistant("ok"));
    }

    #[tokio::test]
    async fn clear_reseeds_greeting() {
        let transport = ScriptedTransport::new(vec![chunk("data: {\"response\":\"ok\"}\n\n")]);
        let session = ChatSession::new(transport, MemoryView::default(), Locale::En);
        session.send("hello").await;
        assert_eq!(session.history().len(), 3);

        session.clear();
        assert_eq!(session.history(), vec![greeting(Locale::En)]);
        session.with_view(|view| assert_eq!(view.entries.len(), 1));
    }

    #[tokio::test]
    async fn locale_switch_regreets_only_before_first_turn() {
        let transport = ScriptedTransport::new(vec![chunk("data: [DONE]\n\n")]);
        let session = ChatSession::new(transport, MemoryView::default(), Locale::Ja);

        assert!(!session.set_locale("fr"));
        assert_eq!(session.locale(), Locale::Ja);

        assert!(session.set_locale("ZH"));
        assert_eq!(session.locale(), Locale::Zh);
        assert_eq!(session.history(), vec![greeting(Locale::Zh)]);

        session.send("你好").await;
        assert!(session.set_locale("en"));
        assert_eq!(session.history()[0], greeting(Locale::Zh));
        assert_eq!(session.history().len(), 2);
    }
}
