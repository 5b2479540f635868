use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
    sync::Arc,
};

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{
    future::{FutureExt, LocalBoxFuture},
    select,
    stream::FuturesUnordered,
    StreamExt,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use waymark_history::{History, Location, LocationKey, MemoryHistory};

use crate::{
    loader::{dispatch, LoaderSettled},
    navigation::{NavigateOptions, NavigationRequester},
    navigator::Navigator,
    resolver::{apply_loader, base_path, check_redirect, commit, run_pipeline, Pipeline},
    route_definition::RouteTree,
    router_cfg::RouterConfig,
    state::{NavigationState, Phase},
};

/// A set of messages that the [`RouterService`] can handle.
pub(crate) enum RouterMessage {
    /// Start resolving an attempt.
    Resolve(NavigationAttempt),

    /// The history moved on its own, e.g. because the user pressed the back button.
    LocationObserved,

    /// A step or loader asked for a new navigation.
    Navigate {
        to: String,
        options: NavigateOptions,
    },
}

/// One try at resolving a location.
pub(crate) struct NavigationAttempt {
    pub(crate) generation: u64,
    pub(crate) location: Location,
    pub(crate) token: CancellationToken,
    /// How many redirects led to this attempt.
    pub(crate) hops: usize,
}

pub(crate) type Subscriber<V> = dyn Fn(&Arc<NavigationState<V>>);

/// The state shared between the [`RouterService`] and its [`Navigator`]s.
pub(crate) struct RouterShared<V> {
    pub(crate) tree: RouteTree<V>,
    pub(crate) config: Arc<RouterConfig<V>>,
    pub(crate) history: Rc<dyn History>,
    pub(crate) state: RefCell<Arc<NavigationState<V>>>,
    pub(crate) generation: Cell<u64>,
    pub(crate) token: RefCell<CancellationToken>,
    pub(crate) latest_key: RefCell<Option<LocationKey>>,
    pub(crate) prevent_scroll_reset: Cell<bool>,
    pub(crate) subscribers: RefCell<Vec<Weak<Subscriber<V>>>>,
    /// Set while subscribers are being called.
    pub(crate) notifying: Cell<bool>,
    /// The state changed during the current notification.
    pub(crate) dirty: Cell<bool>,
    pub(crate) tx: UnboundedSender<RouterMessage>,
}

impl<V> RouterShared<V> {
    pub(crate) fn current_state(&self) -> Arc<NavigationState<V>> {
        self.state.borrow().clone()
    }

    /// Replace the committed snapshot and tell everyone.
    pub(crate) fn set_state(&self, state: NavigationState<V>) {
        *self.state.borrow_mut() = Arc::new(state);
        self.update_subscribers();
    }

    /// Derive a new snapshot from the current one and tell everyone.
    pub(crate) fn update_state(&self, update: impl FnOnce(&mut NavigationState<V>)) {
        let mut state = NavigationState::clone(&self.current_state());
        update(&mut state);
        self.set_state(state);
    }

    pub(crate) fn subscribe(&self, subscriber: &Rc<Subscriber<V>>) {
        self.subscribers.borrow_mut().push(Rc::downgrade(subscriber));
    }

    /// Hand the current state to every subscriber.
    ///
    /// Subscribers may change the state again. Nested changes are not delivered while the outer
    /// pass is running; another pass with the newest state follows instead, so every subscriber
    /// sees states in the order they were set.
    fn update_subscribers(&self) {
        if self.notifying.get() {
            self.dirty.set(true);
            return;
        }

        self.notifying.set(true);
        loop {
            self.dirty.set(false);
            let state = self.current_state();

            // no borrow may be held while subscribers run, they can navigate again
            let subscribers: Vec<_> = {
                let mut subscribers = self.subscribers.borrow_mut();
                subscribers.retain(|s| s.strong_count() > 0);
                subscribers.iter().filter_map(Weak::upgrade).collect()
            };

            for subscriber in subscribers {
                subscriber(&state);
            }

            if !self.dirty.get() {
                break;
            }
        }
        self.notifying.set(false);
    }
}

enum Event<V> {
    Resolved {
        attempt: NavigationAttempt,
        pipeline: Option<Pipeline<V>>,
    },
    Loaded {
        generation: u64,
        settled: LoaderSettled,
    },
}

enum Wake<V> {
    Message(RouterMessage),
    Task(Event<V>),
    Closed,
}

/// The core of the router.
///
/// This combines a [`RouteTree`] and a [`History`] to find the routes matching the current
/// location, runs their steps and loaders, and commits the result into a [`NavigationState`].
/// Subscribed observers are updated whenever the state changes.
///
/// The [`RouterService`] is driven by [`RouterService::run`], and controlled through the
/// [`Navigator`] it returns when it is constructed. Both are single threaded; spawn the service on
/// a local executor.
pub struct RouterService<V> {
    navigator: Navigator<V>,
    rx: UnboundedReceiver<RouterMessage>,
    tasks: FuturesUnordered<LocalBoxFuture<'static, Event<V>>>,
}

impl<V: 'static> RouterService<V> {
    /// Create a new [`RouterService`] backed by a [`MemoryHistory`].
    ///
    /// The returned [`RouterService`] and [`Navigator`] are linked with each other.
    #[must_use]
    pub fn new(tree: RouteTree<V>, config: RouterConfig<V>) -> (Self, Navigator<V>) {
        Self::with_history(tree, config, MemoryHistory::default())
    }

    /// Create a new [`RouterService`] backed by `history`.
    ///
    /// The returned [`RouterService`] and [`Navigator`] are linked with each other.
    #[must_use]
    pub fn with_history(
        tree: RouteTree<V>,
        config: RouterConfig<V>,
        history: impl History + 'static,
    ) -> (Self, Navigator<V>) {
        // create channel
        let (tx, rx) = unbounded();

        // location changes the router didn't cause have to be observed
        let updater = tx.clone();
        history.updater(Arc::new(move || {
            updater.unbounded_send(RouterMessage::LocationObserved).ok();
        }));

        let shared = Rc::new(RouterShared {
            tree,
            config: Arc::new(config),
            history: Rc::new(history),
            state: RefCell::new(Arc::new(NavigationState::default())),
            generation: Cell::new(0),
            token: RefCell::new(CancellationToken::new()),
            latest_key: RefCell::new(None),
            prevent_scroll_reset: Cell::new(false),
            subscribers: RefCell::new(Vec::new()),
            notifying: Cell::new(false),
            dirty: Cell::new(false),
            tx,
        });
        let navigator = Navigator::from_shared(shared);

        (
            Self {
                navigator: navigator.clone(),
                rx,
                tasks: FuturesUnordered::new(),
            },
            navigator,
        )
    }

    /// The routers event loop.
    ///
    /// Resolves the current location of the history first, then handles navigation requests and
    /// settles attempts and loaders as they complete. Attempts never block each other: a new
    /// navigation starts right away, and the results of the ones it superseded are dropped.
    pub async fn run(mut self) {
        // trigger initial routing
        self.navigator.observe_location();

        loop {
            let wake = select! {
                message = self.rx.next() => match message {
                    Some(message) => Wake::Message(message),
                    None => Wake::Closed,
                },
                event = self.tasks.select_next_some() => Wake::Task(event),
                complete => Wake::Closed,
            };

            match wake {
                Wake::Message(message) => self.handle_message(message),
                Wake::Task(Event::Resolved { attempt, pipeline }) => {
                    self.settle_attempt(attempt, pipeline)
                }
                Wake::Task(Event::Loaded {
                    generation,
                    settled,
                }) => self.settle_loader(generation, settled),
                Wake::Closed => break,
            }
        }

        debug!("router service stopped");
    }

    fn shared(&self) -> &RouterShared<V> {
        &self.navigator.shared
    }

    fn handle_message(&mut self, message: RouterMessage) {
        match message {
            RouterMessage::Resolve(attempt) => self.start_attempt(attempt),
            RouterMessage::LocationObserved => self.navigator.observe_location(),
            RouterMessage::Navigate { to, options } => {
                if let Err(error) = self.navigator.navigate(&to, options) {
                    warn!(%to, %error, "requested navigation failed");
                }
            }
        }
    }

    fn start_attempt(&mut self, attempt: NavigationAttempt) {
        let shared = self.shared();
        if attempt.generation != shared.generation.get() {
            trace!(generation = attempt.generation, "skipping superseded attempt");
            return;
        }

        let tree = shared.tree.clone();
        let config = shared.config.clone();
        let base = base_path(&config, shared.history.current_prefix());
        let requester = NavigationRequester::new(shared.tx.clone(), attempt.token.clone());

        self.tasks.push(
            async move {
                let pipeline = run_pipeline(
                    &tree,
                    &config,
                    &base,
                    &attempt.location,
                    &attempt.token,
                    &requester,
                )
                .await;
                Event::Resolved { attempt, pipeline }
            }
            .boxed_local(),
        );
    }

    fn settle_attempt(&mut self, attempt: NavigationAttempt, pipeline: Option<Pipeline<V>>) {
        let current = self.shared().generation.get();
        let pipeline = match pipeline {
            // a cancelled token means a step asked for another navigation
            Some(pipeline) if attempt.generation == current && !attempt.token.is_cancelled() => {
                pipeline
            }
            _ => {
                debug!(
                    generation = attempt.generation,
                    current, "stale result discarded"
                );
                return;
            }
        };

        let redirect = match &pipeline {
            Pipeline::Redirect { target, .. } => Some(target.clone()),
            _ => None,
        };

        let Some(target) = redirect else {
            self.commit(pipeline, attempt);
            return;
        };

        let config = self.shared().config.clone();
        if let Err(error) =
            check_redirect(&attempt.location, &target, attempt.hops, config.max_redirects)
        {
            self.commit(pipeline.refuse_redirect(&config, error), attempt);
            return;
        }

        debug!(from = %attempt.location, to = %target, "following redirect");
        let shared = self.shared();
        shared.update_state(|state| {
            state.redirect_pending = Some(target.href());
            state.phase = Phase::Redirecting;
        });
        shared.history.replace(target.clone());
        self.navigator.begin(target, attempt.hops + 1);
    }

    fn commit(&mut self, pipeline: Pipeline<V>, attempt: NavigationAttempt) {
        let shared = self.shared();
        let mut state = commit(pipeline, attempt.location, attempt.generation);
        state.can_go_back = shared.history.can_go_back();
        state.can_go_forward = shared.history.can_go_forward();
        state.prevent_scroll_reset = shared.prevent_scroll_reset.get();

        let loaders = match state.phase {
            Phase::Committed => dispatch(
                &state.matches,
                &state.location,
                &attempt.token,
                &NavigationRequester::new(shared.tx.clone(), attempt.token.clone()),
            ),
            _ => Vec::new(),
        };

        debug!(
            generation = attempt.generation,
            location = %state.location,
            phase = ?state.phase,
            status = ?state.status,
            "attempt committed"
        );
        shared.set_state(state);

        let generation = attempt.generation;
        for loader in loaders {
            self.tasks.push(
                loader
                    .map(move |settled| Event::Loaded {
                        generation,
                        settled,
                    })
                    .boxed_local(),
            );
        }
    }

    fn settle_loader(&mut self, generation: u64, settled: LoaderSettled) {
        let shared = self.shared();
        let current = shared.generation.get();
        if generation != current {
            debug!(generation, current, route = %settled.route, "stale result discarded");
            return;
        }

        debug!(generation, route = %settled.route, "loader settled");
        shared.update_state(|state| apply_loader(state, settled));
    }
}

impl<V> fmt::Debug for RouterService<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterService")
            .field("in_flight", &self.tasks.len())
            .finish_non_exhaustive()
    }
}
