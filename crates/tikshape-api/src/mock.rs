// In-process mock router
//
// Speaks the API wire protocol on a loopback TCP socket and keeps the
// queue tree, mangle, address and identity tables in memory. Enforces the
// constraints the real router does where the engine depends on them: unique
// queue names, known queue parents, known interfaces, and a login before
// anything else.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::trace;

use crate::auth::DeviceConnection;
use crate::command::Record;
use crate::protocol::{Sentence, SentenceCodec, split_attribute};
use crate::request::{ADDRESS, MANGLE, QUEUE_TREE};

pub const MOCK_USERNAME: &str = "admin";
pub const MOCK_PASSWORD: &str = "secret";

const IDENTITY: &str = "/system/identity";
const INTERFACES: [&str; 6] = ["ether1", "ether2", "ether3", "ether4", "ether5", "bridge1"];
const ROOT_PARENTS: [&str; 1] = ["global"];

type Shared = Arc<Mutex<MockState>>;

fn lock(state: &Shared) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct MockState {
    tables: BTreeMap<&'static str, Vec<Record>>,
    next_id: u32,
    commands: usize,
    logins: usize,
    rejected_logins: usize,
    failures: HashMap<String, String>,
}

impl MockState {
    fn new() -> Self {
        let identity: Record = [(".id", "*0"), ("name", "MockRouter")].into_iter().collect();
        let tables = BTreeMap::from([
            (QUEUE_TREE, Vec::new()),
            (MANGLE, Vec::new()),
            (ADDRESS, Vec::new()),
            (IDENTITY, vec![identity]),
        ]);
        Self {
            tables,
            next_id: 1,
            commands: 0,
            logins: 0,
            rejected_logins: 0,
            failures: HashMap::new(),
        }
    }

    fn allocate_id(&mut self) -> String {
        let id = format!("*{:X}", self.next_id);
        self.next_id += 1;
        id
    }

    fn table(&self, menu: &str) -> &[Record] {
        self.tables.get(menu).map_or(&[], Vec::as_slice)
    }

    /// Answer one sentence. `authed` tracks the per-connection login state.
    fn handle(&mut self, words: &[String], authed: &mut bool) -> Vec<Sentence> {
        let Some((path, args)) = words.split_first() else {
            return Vec::new();
        };
        let mut attrs = BTreeMap::new();
        let mut queries = Vec::new();
        for word in args {
            if let Some((k, v)) = split_attribute(word) {
                attrs.insert(k.to_owned(), v.to_owned());
            } else if let Some((k, v)) = word.strip_prefix('?').and_then(|q| q.split_once('=')) {
                queries.push((k.to_owned(), v.to_owned()));
            }
        }

        if path == "/login" {
            let ok = attrs.get("name").map(String::as_str) == Some(MOCK_USERNAME)
                && attrs.get("password").map(String::as_str) == Some(MOCK_PASSWORD);
            if !ok {
                self.rejected_logins += 1;
                return trap("invalid user name or password (6)");
            }
            *authed = true;
            self.logins += 1;
            return vec![done(None)];
        }
        if !*authed {
            return vec![Sentence::from_iter(["!fatal", "not logged in"])];
        }

        self.commands += 1;
        if let Some(message) = self.failures.remove(path.as_str()) {
            return trap(&message);
        }
        let Some((menu, verb)) = path.rsplit_once('/') else {
            return trap("no such command");
        };
        let Some(menu) = self.tables.keys().copied().find(|m| *m == menu) else {
            return trap("no such command prefix");
        };
        let result = match verb {
            "print" => Ok(self.print(menu, &queries)),
            "add" => self.add(menu, attrs).map(|id| vec![done(Some(id.as_str()))]),
            "set" => self.set(menu, attrs).map(|()| vec![done(None)]),
            "remove" => self.remove(menu, &attrs).map(|()| vec![done(None)]),
            _ => Err("no such command".to_owned()),
        };
        result.unwrap_or_else(|message| trap(&message))
    }

    fn print(&self, menu: &str, queries: &[(String, String)]) -> Vec<Sentence> {
        let mut out: Vec<Sentence> = self
            .table(menu)
            .iter()
            .filter(|row| queries.iter().all(|(k, v)| row.get(k) == Some(v.as_str())))
            .map(|row| {
                std::iter::once("!re".to_owned())
                    .chain(row.attributes().iter().map(|(k, v)| format!("={k}={v}")))
                    .collect()
            })
            .collect();
        out.push(done(None));
        out
    }

    fn add(&mut self, menu: &'static str, attrs: BTreeMap<String, String>) -> Result<String, String> {
        self.check_constraints(menu, &attrs, None)?;
        let id = self.allocate_id();
        let mut row: Record = attrs.into_iter().collect();
        row.set(".id", id.clone());
        if row.get("disabled").is_none() {
            row.set("disabled", "false");
        }
        if menu == MANGLE || menu == ADDRESS {
            row.set("dynamic", "false");
        }
        self.tables.entry(menu).or_default().push(row);
        Ok(id)
    }

    fn set(&mut self, menu: &'static str, mut attrs: BTreeMap<String, String>) -> Result<(), String> {
        let id = attrs.remove(".id").ok_or("missing .id")?;
        let current = self
            .table(menu)
            .iter()
            .find(|r| r.id() == Some(id.as_str()))
            .cloned()
            .ok_or("no such item")?;
        let mut merged = current.attributes().clone();
        merged.extend(attrs);
        self.check_constraints(menu, &merged, Some(id.as_str()))?;
        let renamed = match (current.get("name"), merged.get("name")) {
            (Some(old), Some(new)) if menu == QUEUE_TREE && old != new => {
                Some((old.to_owned(), new.clone()))
            }
            _ => None,
        };
        let rows = self.tables.entry(menu).or_default();
        if let Some(row) = rows.iter_mut().find(|r| r.id() == Some(id.as_str())) {
            *row = Record::new(merged);
        }
        // Children reference their parent by item, so a rename carries over.
        if let Some((old, new)) = renamed {
            for child in rows.iter_mut().filter(|r| r.get("parent") == Some(old.as_str())) {
                child.set("parent", new.clone());
            }
        }
        Ok(())
    }

    fn remove(&mut self, menu: &'static str, attrs: &BTreeMap<String, String>) -> Result<(), String> {
        let ids: Vec<&str> = attrs
            .get(".id")
            .ok_or("missing .id")?
            .split(',')
            .collect();
        let rows = self.tables.entry(menu).or_default();
        if !ids.iter().all(|id| rows.iter().any(|r| r.id() == Some(*id))) {
            return Err("no such item".into());
        }
        rows.retain(|r| r.id().is_none_or(|id| !ids.contains(&id)));
        Ok(())
    }

    /// Router-side validation for a row about to be stored. `own_id` is the
    /// row being edited, excluded from uniqueness checks.
    fn check_constraints(
        &self,
        menu: &str,
        row: &BTreeMap<String, String>,
        own_id: Option<&str>,
    ) -> Result<(), String> {
        let others = || {
            self.table(menu)
                .iter()
                .filter(move |r| own_id.is_none() || r.id() != own_id)
        };
        let field = |k: &str| row.get(k).map(String::as_str).filter(|v| !v.is_empty());
        match menu {
            QUEUE_TREE => {
                let name = field("name").ok_or("missing name")?;
                let parent = field("parent").ok_or("parent not specified")?;
                if others().any(|r| r.get("name") == Some(name)) {
                    return Err("failure: already have such name".into());
                }
                let known_parent = ROOT_PARENTS.contains(&parent)
                    || INTERFACES.contains(&parent)
                    || others().any(|r| r.get("name") == Some(parent));
                if !known_parent {
                    return Err("input does not match any value of parent".into());
                }
            }
            ADDRESS => {
                let address = field("address").ok_or("missing address")?;
                let interface = field("interface").ok_or("missing interface")?;
                if !INTERFACES.contains(&interface) {
                    return Err("input does not match any value of interface".into());
                }
                if others().any(|r| {
                    r.get("address") == Some(address) && r.get("interface") == Some(interface)
                }) {
                    return Err("failure: already have such address".into());
                }
            }
            MANGLE => {
                field("chain").ok_or("missing chain")?;
                field("action").ok_or("missing action")?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn done(ret: Option<&str>) -> Sentence {
    match ret {
        Some(id) => Sentence::from_iter(["!done".to_owned(), format!("=ret={id}")]),
        None => Sentence::from_iter(["!done"]),
    }
}

fn trap(message: &str) -> Vec<Sentence> {
    vec![
        Sentence::from_iter(["!trap".to_owned(), format!("=message={message}")]),
        done(None),
    ]
}

async fn serve(stream: TcpStream, state: Shared, mut kill: watch::Receiver<u64>) {
    let mut framed = Framed::new(stream, SentenceCodec);
    let mut authed = false;
    loop {
        let sentence = tokio::select! {
            _ = kill.changed() => break,
            next = framed.next() => match next {
                Some(Ok(sentence)) => sentence,
                _ => break,
            },
        };
        trace!(path = ?sentence.head(), "mock router received");
        let replies = lock(&state).handle(sentence.words(), &mut authed);
        for reply in replies {
            if framed.feed(reply).await.is_err() {
                return;
            }
        }
        if framed.flush().await.is_err() {
            return;
        }
    }
}

/// A live mock router. Dropping it stops the listener and closes every
/// session.
pub struct MockRouter {
    addr: SocketAddr,
    state: Shared,
    kill: Arc<watch::Sender<u64>>,
    task: JoinHandle<()>,
}

impl MockRouter {
    /// Bind to an ephemeral loopback port and start accepting sessions.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state: Shared = Arc::new(Mutex::new(MockState::new()));
        let kill = Arc::new(watch::Sender::new(0u64));

        let task = {
            let state = Arc::clone(&state);
            let kill = Arc::clone(&kill);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, Arc::clone(&state), kill.subscribe()));
                }
            })
        };
        Ok(Self {
            addr,
            state,
            kill,
            task,
        })
    }

    /// Connection details that authenticate against this router.
    pub fn connection(&self) -> DeviceConnection {
        DeviceConnection::new(
            self.addr.ip().to_string(),
            MOCK_USERNAME,
            SecretString::from(MOCK_PASSWORD.to_owned()),
        )
        .with_port(self.addr.port())
    }

    /// Snapshot of a table (`/queue/tree`, `/ip/firewall/mangle`, ...).
    pub fn table(&self, menu: &str) -> Vec<Record> {
        lock(&self.state).table(menu).to_vec()
    }

    /// First row of `menu` whose `key` equals `value`.
    pub fn find(&self, menu: &str, key: &str, value: &str) -> Option<Record> {
        lock(&self.state)
            .table(menu)
            .iter()
            .find(|r| r.get(key) == Some(value))
            .cloned()
    }

    /// Seed a row directly, bypassing router-side validation. Returns its id.
    pub fn insert(&self, menu: &str, attrs: &[(&str, &str)]) -> String {
        let mut state = lock(&self.state);
        let id = state.allocate_id();
        let mut row: Record = attrs.iter().copied().collect();
        row.set(".id", id.clone());
        if let Some(rows) = state.tables.get_mut(menu) {
            rows.push(row);
        }
        id
    }

    /// Commands handled after login (cache hits never reach this counter).
    pub fn command_count(&self) -> usize {
        lock(&self.state).commands
    }

    pub fn login_count(&self) -> usize {
        lock(&self.state).logins
    }

    /// `/login` attempts refused for bad credentials.
    pub fn rejected_login_count(&self) -> usize {
        lock(&self.state).rejected_logins
    }

    /// Make the next command on `path` fail with a `!trap`.
    pub fn fail_next(&self, path: &str, message: &str) {
        lock(&self.state)
            .failures
            .insert(path.to_owned(), message.to_owned());
    }

    /// Close every open session from the router side.
    pub fn drop_connections(&self) {
        self.kill.send_modify(|generation| *generation += 1);
    }
}

impl Drop for MockRouter {
    fn drop(&mut self) {
        self.task.abort();
        self.drop_connections();
    }
}
