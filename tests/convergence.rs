//! Multi-site convergence tests
//!
//! Drives Wave and Jupiter end to end over an in-memory star network: one
//! server, several clients, one FIFO queue per direction and link. Delivery
//! order across links is chosen by each test, which is how concurrency is
//! simulated.
//!
//! Run with:
//!   cargo test --test convergence

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use tandem::algorithm::{ClientAlgorithm, ServerAlgorithm};
use tandem::{
    AlgorithmKind, ClientReplica, ConflictPolicy, Destination, Element, FieldDelta, FillMode,
    Operation, OperationSender, QueueSender, Record, ReplicaConfig, ReplicatedText, ServerEvent,
    ServerReplica, SyncMessage, Value,
};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Outbox<T> {
    sent: Mutex<Vec<(Destination, Operation<T>)>>,
}

impl<T> Outbox<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn drain(&self) -> Vec<(Destination, Operation<T>)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl<T: Send> OperationSender<T> for Outbox<T> {
    fn send_operation(&self, destination: Destination, op: Operation<T>) {
        self.sent.lock().unwrap().push((destination, op));
    }
}

/// One server and `n` clients connected by FIFO links
struct Star<T: Element> {
    server: Box<dyn ServerAlgorithm<T>>,
    server_out: Arc<Outbox<T>>,
    clients: Vec<Box<dyn ClientAlgorithm<T>>>,
    client_out: Vec<Arc<Outbox<T>>>,
    up: Vec<VecDeque<Operation<T>>>,
    down: Vec<VecDeque<Operation<T>>>,
}

impl<T: Element> Star<T> {
    fn new(config: &ReplicaConfig, n: usize) -> Self {
        Self::with_initial(config, n, Vec::new())
    }

    /// Server starts from `initial`, inserted through a bootstrap client
    fn with_initial(config: &ReplicaConfig, n: usize, initial: Vec<T>) -> Self {
        let server_out = Outbox::new();
        let mut server = config.server_algorithm(server_out.clone());

        if !initial.is_empty() {
            let seed = Uuid::new_v4();
            server.add_site(seed, config.fill).unwrap();
            let axes = server.state().len();
            for (i, value) in initial.into_iter().enumerate() {
                // Wave: server revision. Jupiter: operations generated by the seed.
                let mut state = vec![0; axes];
                state[0] = i as u64;
                let op = Operation::insert(i, value)
                    .stamped(seed, tandem::State::from_components(state));
                server.integrate(op).unwrap();
            }
            server.remove_site(seed).unwrap();
            server_out.drain();
        }

        let mut star = Self {
            server,
            server_out,
            clients: Vec::new(),
            client_out: Vec::new(),
            up: Vec::new(),
            down: Vec::new(),
        };
        for _ in 0..n {
            star.join(config);
        }
        star
    }

    fn join(&mut self, config: &ReplicaConfig) -> usize {
        let out = Outbox::new();
        let site = Uuid::new_v4();
        let mut client = config.client_algorithm(site, out.clone());
        let fill = self.server.add_site(site, config.fill).unwrap();
        client.fill(fill).unwrap();

        self.clients.push(client);
        self.client_out.push(out);
        self.up.push(VecDeque::new());
        self.down.push(VecDeque::new());
        self.clients.len() - 1
    }

    fn collect(&mut self) {
        for (i, out) in self.client_out.iter().enumerate() {
            for (dest, op) in out.drain() {
                assert_eq!(dest, Destination::Server);
                self.up[i].push_back(op);
            }
        }
        for (dest, op) in self.server_out.drain() {
            let i = self
                .clients
                .iter()
                .position(|c| Destination::Site(c.site()) == dest)
                .expect("broadcast to a site that never joined");
            self.down[i].push_back(op);
        }
    }

    fn edit(&mut self, at: usize, op: Operation<T>) {
        self.clients[at].generate(op).unwrap();
        self.collect();
    }

    /// Deliver the oldest pending operation from client `from` to the server
    fn up_one(&mut self, from: usize) -> bool {
        self.collect();
        match self.up[from].pop_front() {
            Some(op) => {
                self.server.integrate(op).unwrap();
                self.collect();
                true
            }
            None => false,
        }
    }

    /// Deliver the oldest pending server operation to client `to`
    fn down_one(&mut self, to: usize) -> bool {
        self.collect();
        match self.down[to].pop_front() {
            Some(op) => {
                self.clients[to].integrate(op).unwrap();
                self.collect();
                true
            }
            None => false,
        }
    }

    fn settle(&mut self) {
        loop {
            let mut moved = false;
            for i in 0..self.clients.len() {
                while self.up_one(i) {
                    moved = true;
                }
            }
            for i in 0..self.clients.len() {
                while self.down_one(i) {
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
    }

    fn client_values(&self, i: usize) -> Vec<T> {
        self.clients[i].core().model().values()
    }

    fn assert_converged(&self) -> Vec<T> {
        let expected = self.server.core().model().values();
        for i in 0..self.clients.len() {
            assert_eq!(self.client_values(i), expected, "client {} diverged", i);
        }
        expected
    }
}

fn configs() -> Vec<ReplicaConfig> {
    let mut all = Vec::new();
    for algorithm in [AlgorithmKind::Wave, AlgorithmKind::Jupiter] {
        for conflict in [ConflictPolicy::FirstWriterWins, ConflictPolicy::LastWriterWins] {
            for fill in [FillMode::StateBased, FillMode::OperationBased] {
                all.push(ReplicaConfig {
                    algorithm,
                    conflict,
                    fill,
                });
            }
        }
    }
    all
}

fn text(values: &[char]) -> String {
    values.iter().collect()
}

fn task(title: &str) -> Record {
    Record::new("task")
        .with_field("title", Value::string(title))
        .with_field("done", Value::bool(false))
        .with_field("owner", Value::Null)
}

fn set(fields: &[(&str, Value)]) -> FieldDelta {
    fields
        .iter()
        .map(|(f, v)| (f.to_string(), v.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_three_sites_insert_tie_break() {
    init_logging();
    for config in configs() {
        let mut star: Star<char> = Star::new(&config, 3);
        for (i, c) in "ABC".chars().enumerate() {
            star.edit(0, Operation::insert(i, c));
        }
        star.edit(1, Operation::insert(0, 'X'));
        assert_eq!(text(&star.client_values(0)), "ABC");
        assert_eq!(text(&star.client_values(1)), "X");

        // X is accepted by the server first, so it keeps position 0
        star.up_one(1);
        star.settle();

        let result = text(&star.assert_converged());
        assert_eq!(result, "XABC", "{:?}", config);
    }
}

#[test]
fn test_three_sites_other_arrival_order() {
    for config in configs() {
        let mut star: Star<char> = Star::new(&config, 3);
        for (i, c) in "ABC".chars().enumerate() {
            star.edit(0, Operation::insert(i, c));
        }
        star.edit(1, Operation::insert(0, 'X'));

        // A's first insert wins the tie this time
        star.up_one(0);
        star.settle();

        let result = text(&star.assert_converged());
        assert_eq!(result.len(), 4);
        assert!(result.starts_with('A'), "{:?}: {}", config, result);
    }
}

#[test]
fn test_concurrent_replace_last_writer_wins() {
    for algorithm in [AlgorithmKind::Wave, AlgorithmKind::Jupiter] {
        let config = ReplicaConfig {
            algorithm,
            conflict: ConflictPolicy::LastWriterWins,
            fill: FillMode::StateBased,
        };
        let mut star = Star::with_initial(&config, 2, "abc".chars().collect());
        star.edit(0, Operation::replace(1, 'X'));
        star.edit(1, Operation::replace(1, 'Y'));

        star.up_one(0);
        star.up_one(1);
        star.settle();

        assert_eq!(text(&star.assert_converged()), "aYc", "{:?}", algorithm);
    }
}

#[test]
fn test_concurrent_replace_first_writer_wins() {
    for algorithm in [AlgorithmKind::Wave, AlgorithmKind::Jupiter] {
        let config = ReplicaConfig {
            algorithm,
            conflict: ConflictPolicy::FirstWriterWins,
            fill: FillMode::StateBased,
        };
        let mut star = Star::with_initial(&config, 2, "abc".chars().collect());
        star.edit(0, Operation::replace(1, 'X'));
        star.edit(1, Operation::replace(1, 'Y'));

        star.up_one(0);
        star.up_one(1);
        star.settle();

        assert_eq!(text(&star.assert_converged()), "aXc", "{:?}", algorithm);
    }
}

#[test]
fn test_entity_updates_disjoint_fields_merge() {
    for config in configs() {
        let mut star = Star::with_initial(&config, 2, vec![task("draft")]);
        star.edit(
            0,
            Operation::update_entity(0, "task", set(&[("title", Value::string("final"))])).unwrap(),
        );
        star.edit(
            1,
            Operation::update_entity(0, "task", set(&[("done", Value::bool(true))])).unwrap(),
        );
        star.up_one(1);
        star.settle();

        let records = star.assert_converged();
        assert_eq!(records[0].field("title"), Some(&Value::string("final")));
        assert_eq!(records[0].field("done"), Some(&Value::bool(true)));
    }
}

#[test]
fn test_entity_updates_overlapping_fields() {
    for config in configs() {
        let mut star = Star::with_initial(&config, 2, vec![task("draft")]);
        star.edit(
            0,
            Operation::update_entity(
                0,
                "task",
                set(&[("title", Value::string("mine")), ("done", Value::bool(true))]),
            )
            .unwrap(),
        );
        star.edit(
            1,
            Operation::update_entity(
                0,
                "task",
                set(&[("title", Value::string("theirs")), ("owner", Value::string("b"))]),
            )
            .unwrap(),
        );

        // Site 0 reaches the server first
        star.up_one(0);
        star.up_one(1);
        star.settle();

        let records = star.assert_converged();
        let expected_title = match config.conflict {
            ConflictPolicy::FirstWriterWins => "mine",
            ConflictPolicy::LastWriterWins => "theirs",
        };
        assert_eq!(
            records[0].field("title"),
            Some(&Value::string(expected_title)),
            "{:?}",
            config
        );
        // Non-conflicting fields from both sides survive
        assert_eq!(records[0].field("done"), Some(&Value::bool(true)));
        assert_eq!(records[0].field("owner"), Some(&Value::string("b")));
    }
}

#[test]
fn test_replace_beats_entity_update() {
    for config in configs() {
        let mut star = Star::with_initial(&config, 2, vec![task("draft")]);
        star.edit(
            0,
            Operation::update_entity(0, "task", set(&[("done", Value::bool(true))])).unwrap(),
        );
        star.edit(1, Operation::replace(0, task("fresh")));
        star.up_one(0);
        star.settle();

        let records = star.assert_converged();
        assert_eq!(records[0], task("fresh"), "{:?}", config);
    }
}

#[test]
fn test_delete_wins_over_concurrent_update() {
    for config in configs() {
        let mut star = Star::with_initial(&config, 2, "abc".chars().collect());
        star.edit(0, Operation::delete(1));
        star.edit(1, Operation::replace(1, 'Z'));
        star.up_one(1);
        star.settle();

        assert_eq!(text(&star.assert_converged()), "ac", "{:?}", config);
    }
}

#[test]
fn test_fill_reproduces_server_document() {
    for config in configs() {
        let mut star: Star<char> = Star::new(&config, 2);
        star.edit(0, Operation::insert(0, 'o'));
        star.edit(1, Operation::insert(0, 'n'));
        star.edit(0, Operation::insert(1, 'k'));
        star.settle();
        star.edit(1, Operation::delete(0));
        star.settle();

        let late = star.join(&config);
        assert_eq!(star.client_values(late), star.server.core().model().values());

        // The late joiner takes part like everyone else
        star.edit(late, Operation::insert(0, '!'));
        star.settle();
        star.assert_converged();
    }
}

// ---------------------------------------------------------------------------
// Randomized schedules
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
enum Step {
    Insert { site: usize, pos_pct: f64, c: char },
    Delete { site: usize, pos_pct: f64 },
    Replace { site: usize, pos_pct: f64, c: char },
    Up { site: usize },
    Down { site: usize },
}

const SITES: usize = 3;

fn arbitrary_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..SITES, 0.0..=1.0f64, prop::char::range('a', 'z'))
            .prop_map(|(site, pos_pct, c)| Step::Insert { site, pos_pct, c }),
        (0..SITES, 0.0..=1.0f64).prop_map(|(site, pos_pct)| Step::Delete { site, pos_pct }),
        (0..SITES, 0.0..=1.0f64, prop::char::range('A', 'Z'))
            .prop_map(|(site, pos_pct, c)| Step::Replace { site, pos_pct, c }),
        (0..SITES).prop_map(|site| Step::Up { site }),
        (0..SITES).prop_map(|site| Step::Down { site }),
    ]
}

fn arbitrary_config() -> impl Strategy<Value = ReplicaConfig> {
    (any::<bool>(), any::<bool>()).prop_map(|(jupiter, fww)| ReplicaConfig {
        algorithm: if jupiter {
            AlgorithmKind::Jupiter
        } else {
            AlgorithmKind::Wave
        },
        conflict: if fww {
            ConflictPolicy::FirstWriterWins
        } else {
            ConflictPolicy::LastWriterWins
        },
        fill: FillMode::StateBased,
    })
}

fn pick(len: usize, pct: f64, inclusive: bool) -> Option<usize> {
    let slots = if inclusive { len + 1 } else { len };
    if slots == 0 {
        return None;
    }
    Some(((pct * slots as f64) as usize).min(slots - 1))
}

fn run_schedule(star: &mut Star<char>, steps: &[Step]) {
    for step in steps {
        match step {
            Step::Insert { site, pos_pct, c } => {
                let len = star.client_values(*site).len();
                if let Some(pos) = pick(len, *pos_pct, true) {
                    star.edit(*site, Operation::insert(pos, *c));
                }
            }
            Step::Delete { site, pos_pct } => {
                let len = star.client_values(*site).len();
                if let Some(pos) = pick(len, *pos_pct, false) {
                    star.edit(*site, Operation::delete(pos));
                }
            }
            Step::Replace { site, pos_pct, c } => {
                let len = star.client_values(*site).len();
                if let Some(pos) = pick(len, *pos_pct, false) {
                    star.edit(*site, Operation::replace(pos, *c));
                }
            }
            Step::Up { site } => {
                star.up_one(*site);
            }
            Step::Down { site } => {
                star.down_one(*site);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Whatever the interleaving, every replica ends with the server's document
    #[test]
    fn random_schedules_converge(
        config in arbitrary_config(),
        steps in prop::collection::vec(arbitrary_step(), 1..80),
    ) {
        let mut star = Star::with_initial(&config, SITES, "seed".chars().collect());
        run_schedule(&mut star, &steps);
        star.settle();

        let expected = star.server.core().model().values();
        for i in 0..SITES {
            prop_assert_eq!(star.client_values(i), expected.clone());
        }
    }

    /// Replaying the server's history gives the server's document
    #[test]
    fn history_replay_matches_document(
        config in arbitrary_config(),
        steps in prop::collection::vec(arbitrary_step(), 1..60),
    ) {
        let mut star: Star<char> = Star::new(&config, SITES);
        run_schedule(&mut star, &steps);
        star.settle();

        let mut replay = tandem::model::LinearModel::new();
        for op in star.server.history().iter() {
            replay.apply(op).unwrap();
        }
        prop_assert_eq!(replay.values(), star.server.core().model().values());
    }
}

// ---------------------------------------------------------------------------
// Replicas over tokio channels
// ---------------------------------------------------------------------------

/// Connect clients to a server replica with routing tasks
async fn wire(
    config: &ReplicaConfig,
    n: usize,
) -> (ServerReplica<char>, Vec<ClientReplica<char>>) {
    let (server_sender, mut server_out) = QueueSender::channel();
    let server = ServerReplica::new(config, Arc::new(server_sender));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    server.spawn_receiver(events_rx);

    let mut clients = Vec::new();
    let mut inboxes = Vec::new();
    for _ in 0..n {
        let (sender, mut client_out) = QueueSender::channel();
        let replica = ClientReplica::new(config, Uuid::new_v4(), Arc::new(sender));
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        replica.spawn_receiver(inbox_rx);

        // Join through the server's event loop
        let (reply_tx, reply_rx) = oneshot::channel();
        events_tx
            .send(ServerEvent::SiteJoined {
                site: replica.site(),
                reply: reply_tx,
            })
            .unwrap();
        let fill = reply_rx.await.unwrap().unwrap();
        inbox_tx.send(SyncMessage::Fill(fill)).unwrap();

        // Client -> server
        let events = events_tx.clone();
        tokio::spawn(async move {
            while let Some((_, op)) = client_out.recv().await {
                if events.send(ServerEvent::Operation(op)).is_err() {
                    break;
                }
            }
        });

        inboxes.push((replica.site(), inbox_tx));
        clients.push(replica);
    }

    // Server -> clients
    tokio::spawn(async move {
        while let Some((dest, op)) = server_out.recv().await {
            if let Some((_, inbox)) = inboxes
                .iter()
                .find(|(site, _)| Destination::Site(*site) == dest)
            {
                let _ = inbox.send(SyncMessage::Operation(op));
            }
        }
    });

    (server, clients)
}

async fn wait_for_convergence(
    server: &ServerReplica<char>,
    clients: &[ClientReplica<char>],
    expected_ops: usize,
) -> String {
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let doc = server.values().unwrap();
        let settled = server.history().unwrap().len() == expected_ops
            && clients.iter().all(|c| c.values().unwrap() == doc);
        if settled {
            return doc.into_iter().collect();
        }
    }
    panic!("replicas did not converge");
}

#[tokio::test]
async fn test_replicas_converge_over_channels() {
    init_logging();
    for algorithm in [AlgorithmKind::Wave, AlgorithmKind::Jupiter] {
        let config = ReplicaConfig {
            algorithm,
            ..Default::default()
        };
        let (server, clients) = wire(&config, 3).await;

        let texts: Vec<ReplicatedText> = clients
            .iter()
            .map(|c| ReplicatedText::new(c.clone()))
            .collect();

        let (a, b, c) = (&texts[0], &texts[1], &texts[2]);
        tokio::join!(
            async { a.insert_str(0, "hello").await.unwrap() },
            async { b.insert_str(0, "world").await.unwrap() },
            async { c.insert_char(0, '!').await.unwrap() },
        );

        let doc = wait_for_convergence(&server, &clients, 11).await;
        assert_eq!(doc.len(), 11);
        for t in &texts {
            assert_eq!(t.to_string(), doc);
        }
    }
}
