//! Background wallet service.
//!
//! A tokio task owns the [`Session`] and runs the connect, serve, wait for
//! removal, reconnect cycle. Callers go through a cloneable [`WalletHandle`]:
//! requests are marshalled to the task over a channel and the current card
//! state is published on a watch channel.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{ReaderProvider, Session, SessionError, StopSignal, discover};
use crate::config::SessionConfig;

/// What the service currently sees in the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardState {
    /// No usable card yet.
    Waiting,
    Connected { reader: String, balance: i16 },
    /// The last connection attempt failed; retried on the next tick.
    Failed(String),
    Stopped,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no card connected")]
    NoCard,

    #[error("wallet service stopped")]
    Stopped,

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ServiceError {
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, ServiceError::Session(SessionError::NegativeBalance(_)))
    }
}

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

#[derive(Debug)]
enum Request {
    Balance(Reply<i16>),
    Credit(i16, Reply<i16>),
    Debit(i16, Reply<i16>),
    ToggleDebug(Reply<()>),
}

/// Handle to a running [`WalletService`].
#[derive(Debug, Clone)]
pub struct WalletHandle {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<CardState>,
    stop: StopSignal,
}

impl WalletHandle {
    pub async fn balance(&self) -> Result<i16, ServiceError> {
        self.call(Request::Balance).await
    }

    /// Credit `amount`; returns the new balance.
    pub async fn credit(&self, amount: i16) -> Result<i16, ServiceError> {
        self.call(|reply| Request::Credit(amount, reply)).await
    }

    /// Debit `amount`; returns the new balance.
    pub async fn debit(&self, amount: i16) -> Result<i16, ServiceError> {
        self.call(|reply| Request::Debit(amount, reply)).await
    }

    pub async fn toggle_debug(&self) -> Result<(), ServiceError> {
        self.call(Request::ToggleDebug).await
    }

    pub fn state(&self) -> CardState {
        self.state.borrow().clone()
    }

    /// Wait until a card is connected (or the service stops).
    pub async fn wait_for_card(&self) -> Result<CardState, ServiceError> {
        self.wait_for_state(|s| matches!(s, CardState::Connected { .. }))
            .await
    }

    /// Wait until no card is connected (or the service stops).
    pub async fn wait_for_removal(&self) -> Result<CardState, ServiceError> {
        self.wait_for_state(|s| !matches!(s, CardState::Connected { .. }))
            .await
    }

    /// Ask the service to stop at its next tick.
    pub fn shutdown(&self) {
        self.stop.stop();
    }

    async fn wait_for_state(
        &self,
        f: impl Fn(&CardState) -> bool,
    ) -> Result<CardState, ServiceError> {
        let mut state = self.state.clone();
        let seen = state
            .wait_for(|s| f(s) || *s == CardState::Stopped)
            .await
            .map_err(|_| ServiceError::Stopped)?
            .clone();
        match seen {
            CardState::Stopped => Err(ServiceError::Stopped),
            other => Ok(other),
        }
    }

    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(request(reply))
            .await
            .map_err(|_| ServiceError::Stopped)?;
        response.await.map_err(|_| ServiceError::Stopped)?
    }
}

/// The task behind a [`WalletHandle`].
pub struct WalletService<P: ReaderProvider> {
    provider: P,
    config: SessionConfig,
    requests: mpsc::Receiver<Request>,
    state: watch::Sender<CardState>,
    stop: StopSignal,
    session: Option<Session<P::Terminal>>,
}

/// Public API
impl<P: ReaderProvider> WalletService<P> {
    /// Spawn the service on the current tokio runtime.
    pub fn spawn(provider: P, config: SessionConfig) -> (WalletHandle, JoinHandle<()>) {
        let (requests_tx, requests) = mpsc::channel(16);
        let (state, state_rx) = watch::channel(CardState::Waiting);
        let stop = StopSignal::new();

        let service = WalletService {
            provider,
            config,
            requests,
            state,
            stop: stop.clone(),
            session: None,
        };
        let task = tokio::spawn(service.run());

        let handle = WalletHandle {
            requests: requests_tx,
            state: state_rx,
            stop,
        };
        (handle, task)
    }

    /// Run until [`WalletHandle::shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.stop.is_stopped() {
                break;
            }
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.serve(request),
                    None => break,
                },
                _ = ticker.tick() => self.poll(),
            }
        }

        if let Some(mut session) = self.session.take() {
            session.disconnect();
        }
        self.publish(CardState::Stopped);
        info!("wallet service stopped");
    }
}

/// Private API
impl<P: ReaderProvider> WalletService<P> {
    fn publish(&self, next: CardState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(state = ?next, "card state changed");
            *current = next;
            true
        });
    }

    /// One tick: detect removal of the current card, or try to connect one.
    fn poll(&mut self) {
        if let Some(session) = self.session.as_mut() {
            match session.poll_removal() {
                Ok(false) => return,
                Ok(true) => {}
                Err(e) => warn!(reason = %e, "removal check failed"),
            }
            self.session = None;
            self.publish(CardState::Waiting);
            return;
        }

        match self.try_connect() {
            Ok(Some(state)) => self.publish(state),
            Ok(None) => self.publish(CardState::Waiting),
            Err(e) => {
                if !matches!(&*self.state.borrow(), CardState::Failed(_)) {
                    warn!(reason = %e, "card connection failed");
                }
                self.publish(CardState::Failed(e.to_string()));
            }
        }
    }

    fn try_connect(&mut self) -> Result<Option<CardState>, SessionError> {
        let terminal = discover(&self.provider, self.config.reader_index)?;
        // the ticker does the waiting
        let config = self.config.clone().with_wait_for_card(false);
        let Some(mut session) = Session::connect(terminal, &config, &self.stop)? else {
            return Ok(None);
        };

        let balance = session.get_balance()?;
        let reader = session.reader_name().to_string();
        info!(reader = %reader, balance, "card connected");
        self.session = Some(session);
        Ok(Some(CardState::Connected { reader, balance }))
    }

    fn serve(&mut self, request: Request) {
        match request {
            Request::Balance(reply) => {
                let result = self
                    .with_session(|_| Ok(()))
                    .and_then(|((), balance)| balance);
                let _ = reply.send(result);
            }
            Request::Credit(amount, reply) => {
                let result = self
                    .with_session(|s| s.credit(amount))
                    .and_then(|((), balance)| balance);
                Self::log_result("credit", amount, &result);
                let _ = reply.send(result);
            }
            Request::Debit(amount, reply) => {
                let result = self
                    .with_session(|s| s.debit(amount))
                    .and_then(|((), balance)| balance);
                Self::log_result("debit", amount, &result);
                let _ = reply.send(result);
            }
            Request::ToggleDebug(reply) => {
                let result = self.with_session(|s| s.toggle_debug()).map(|_| ());
                let _ = reply.send(result);
            }
        }
    }

    /// Run `f` against the connected session, then read and publish the
    /// balance once. The balance read comes back alongside `f`'s value.
    fn with_session<T>(
        &mut self,
        f: impl FnOnce(&mut Session<P::Terminal>) -> Result<T, SessionError>,
    ) -> Result<(T, Result<i16, ServiceError>), ServiceError> {
        let session = self.session.as_mut().ok_or(ServiceError::NoCard)?;
        let result = f(session);
        let balance = session.get_balance();
        if let Ok(balance) = &balance {
            let balance = *balance;
            let reader = session.reader_name().to_string();
            self.publish(CardState::Connected { reader, balance });
        }
        Ok((result?, balance.map_err(ServiceError::from)))
    }

    fn log_result(operation: &str, amount: i16, result: &Result<i16, ServiceError>) {
        match result {
            Ok(balance) => info!(amount, balance, "{operation} applied"),
            Err(e) => info!(amount, reason = %e, "{operation} refused"),
        }
    }
}
