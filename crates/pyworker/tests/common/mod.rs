//! Scripted in-memory runtime shared by the integration tests.
//!
//! `FakeRuntime` understands a tiny statement language, just enough to drive
//! the engines through their interesting paths:
//!
//! - `name = <expr>` assigns; `<expr>` alone evaluates and returns the value
//! - expressions: integer and quoted string literals, names, `object()`
//!   (a proxy value), `input("prompt")`, `readline()`
//! - `print(<expr>)` flushes one line to stdout
//! - `raise <message>` raises an interpreter exception; `raise_untraced` and
//!   `raise_blank` raise one whose formatted traceback is missing or blank
//! - `fault()` fails the runtime itself
//! - `await sleep()` suspends once before completing
//! - `if True:` blocks run their body; other block headers are accepted and skipped
//!
//! Lines containing `$` or unbalanced closing brackets are syntax errors.
//! Every handle acquisition and release is recorded in a [`Ledger`].

#![expect(dead_code, reason = "each test binary uses a different subset of the fixture")]

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    rc::Rc,
};

use pyworker::{
    InputBridge, InputError, InputProvider, InputRequest, InterpreterException, Release, Runtime, RuntimeError,
    RuntimeLoader, StdoutRelay, SyntaxCheck, VirtualFs,
};

pub const FAKE_VERSION: &str = "0.26.2";
pub const FAKE_BANNER: &str = "Python 3.12.1 (fake runtime)";

// =============================================================================
// Handle ledger
// =============================================================================

/// Kinds of interpreter handles tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Pending,
    Awaitable,
    Proxy,
    Namespace,
    Object,
}

/// Acquire/release counts per handle kind.
#[derive(Debug, Default)]
pub struct Ledger {
    counts: RefCell<HashMap<Kind, (usize, usize)>>,
}

impl Ledger {
    fn acquire(&self, kind: Kind) {
        self.counts.borrow_mut().entry(kind).or_default().0 += 1;
    }

    fn release(&self, kind: Kind) {
        self.counts.borrow_mut().entry(kind).or_default().1 += 1;
    }

    pub fn acquired(&self, kind: Kind) -> usize {
        self.counts.borrow().get(&kind).map_or(0, |counts| counts.0)
    }

    pub fn released(&self, kind: Kind) -> usize {
        self.counts.borrow().get(&kind).map_or(0, |counts| counts.1)
    }

    pub fn outstanding(&self, kind: Kind) -> usize {
        self.acquired(kind) - self.released(kind)
    }
}

/// A tracked handle; releasing it twice panics.
#[derive(Debug)]
pub struct Handle<T> {
    kind: Kind,
    fixture: Rc<Fixture>,
    released: Rc<Cell<bool>>,
    pub inner: T,
}

impl<T> Handle<T> {
    fn new(fixture: &Rc<Fixture>, kind: Kind, inner: T) -> Self {
        fixture.ledger.acquire(kind);
        Self {
            kind,
            fixture: Rc::clone(fixture),
            released: Rc::new(Cell::new(false)),
            inner,
        }
    }
}

impl<T> Release for Handle<T> {
    fn release(self) {
        assert!(!self.released.replace(true), "{:?} handle released twice", self.kind);
        self.fixture.ledger.release(self.kind);
    }
}

// =============================================================================
// Fixture shared between the loader, the runtime and the test
// =============================================================================

/// Where the loader or runtime should fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPoint {
    Load,
    LoadPackage(String),
    Install,
    Snippet,
    MissingHelper(&'static str),
}

/// A bootstrap snippet the runtime executed.
#[derive(Debug, Clone)]
pub struct Snippet {
    pub code: String,
    pub namespaced: bool,
}

/// Everything the runtime did during bootstrap.
#[derive(Debug, Default)]
pub struct Journal {
    pub loads: usize,
    pub loaded: Vec<Vec<String>>,
    pub installed: Vec<(String, Vec<String>)>,
    pub modules: Vec<String>,
    pub snippets: Vec<Snippet>,
}

#[derive(Debug, Default)]
pub struct Fixture {
    pub ledger: Ledger,
    pub journal: RefCell<Journal>,
    pub fail: RefCell<Option<FailPoint>>,
    pub bridge: RefCell<Option<Rc<InputBridge>>>,
}

impl Fixture {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn failing_at(point: FailPoint) -> Rc<Self> {
        let fixture = Self::new();
        *fixture.fail.borrow_mut() = Some(point);
        fixture
    }

    fn fails_at(&self, point: &FailPoint) -> bool {
        self.fail.borrow().as_ref() == Some(point)
    }
}

/// Loader handing out [`FakeRuntime`]s bound to one fixture.
#[derive(Debug, Clone)]
pub struct FakeLoader {
    pub fixture: Rc<Fixture>,
}

impl FakeLoader {
    pub fn new(fixture: &Rc<Fixture>) -> Self {
        Self {
            fixture: Rc::clone(fixture),
        }
    }
}

impl RuntimeLoader for FakeLoader {
    type Runtime = FakeRuntime;

    async fn load(&self) -> Result<FakeRuntime, RuntimeError> {
        tokio::task::yield_now().await;
        self.fixture.journal.borrow_mut().loads += 1;
        if self.fixture.fails_at(&FailPoint::Load) {
            return Err(RuntimeError::fault("failed to fetch runtime"));
        }
        Ok(FakeRuntime::new(Rc::clone(&self.fixture)))
    }
}

/// Input provider answering from a queue and recording every request.
#[derive(Debug, Default)]
pub struct QueuedInput {
    answers: RefCell<VecDeque<String>>,
    pub requests: RefCell<Vec<InputRequest>>,
}

impl QueuedInput {
    pub fn with_answers(answers: &[&str]) -> Rc<Self> {
        Rc::new(Self {
            answers: RefCell::new(answers.iter().map(|&answer| answer.to_owned()).collect()),
            requests: RefCell::default(),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests.borrow().iter().map(|request| request.prompt.clone()).collect()
    }
}

impl InputProvider for QueuedInput {
    fn request_line(&self, request: &InputRequest) -> Result<String, InputError> {
        self.requests.borrow_mut().push(request.clone());
        self.answers.borrow_mut().pop_front().ok_or(InputError::Abandoned)
    }
}

// =============================================================================
// Values and handles
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Val {
    None,
    Int(i64),
    Str(String),
    /// An interpreter object only reachable through a proxy.
    Object(String),
}

/// A value returned by evaluation; only objects are tracked proxies.
#[derive(Debug)]
pub struct FakeValue {
    pub val: Val,
    proxy: Option<Handle<()>>,
}

impl Release for FakeValue {
    fn release(self) {
        if let Some(proxy) = self.proxy {
            proxy.release();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Console,
    AwaitFut,
    ReprShorten,
    ClearConsole,
    Banner(String),
}

pub type FakeNamespace = Handle<usize>;
pub type FakeObject = Handle<Binding>;

/// What a pushed line will do once awaited.
#[derive(Debug, Clone)]
enum LinePlan {
    /// Incomplete input: resolves to `None`.
    Buffered,
    Run(String),
    SyntaxError(String),
}

#[derive(Debug)]
pub struct PendingLine {
    verdict: SyntaxCheck,
    plan: LinePlan,
    formatted_error: Rc<RefCell<Option<String>>>,
}

pub type FakePending = Handle<PendingLine>;

#[derive(Debug)]
pub struct AwaitPlan {
    plan: LinePlan,
    formatted_error: Rc<RefCell<Option<String>>>,
}

pub type FakeAwaitable = Handle<AwaitPlan>;

// =============================================================================
// Runtime
// =============================================================================

/// An exception or fault raised while evaluating.
struct Raised {
    error: RuntimeError,
    traceback: Option<String>,
}

impl Raised {
    fn exception(kind: &str, message: &str) -> Self {
        Self {
            error: RuntimeError::Exception(InterpreterException::new(format!("{kind}: {message}"))),
            traceback: Some(format!(
                "Traceback (most recent call last):\n  File \"<console>\", line 1, in <module>\n{kind}: {message}\n"
            )),
        }
    }

    fn fault(message: &str) -> Self {
        Self {
            error: RuntimeError::fault(message),
            traceback: None,
        }
    }
}

pub struct FakeRuntime {
    fixture: Rc<Fixture>,
    stdout: Option<StdoutRelay>,
    globals: HashMap<String, Val>,
    buffer: Vec<String>,
    next_namespace: usize,
    populated: HashSet<usize>,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl FakeRuntime {
    fn new(fixture: Rc<Fixture>) -> Self {
        Self {
            fixture,
            stdout: None,
            globals: HashMap::new(),
            buffer: Vec::new(),
            next_namespace: 0,
            populated: HashSet::new(),
            files: BTreeMap::new(),
            dirs: BTreeSet::from(["/".to_owned(), "/home".to_owned()]),
        }
    }

    fn print(&mut self, text: &str) {
        if let Some(relay) = self.stdout.as_mut() {
            relay.write(format!("{text}\n").as_bytes());
        }
    }

    fn value(&self, val: Val) -> FakeValue {
        let proxy = matches!(val, Val::Object(_)).then(|| Handle::new(&self.fixture, Kind::Proxy, ()));
        FakeValue { val, proxy }
    }

    fn bridge(&self) -> Result<Rc<InputBridge>, Raised> {
        self.fixture
            .bridge
            .borrow()
            .clone()
            .ok_or_else(|| Raised::exception("ModuleNotFoundError", "No module named 'react_py'"))
    }

    async fn eval_source(&mut self, source: &str) -> Result<Option<Val>, Raised> {
        let mut lines = source.lines().filter(|line| !line.trim().is_empty());
        let Some(first) = lines.next() else {
            return Ok(None);
        };
        if let Some(header) = first.trim_end().strip_suffix(':') {
            if header.trim() == "if True" {
                let mut last = None;
                for line in lines {
                    last = self.eval_statement(line.trim()).await?;
                }
                return Ok(last);
            }
            return Ok(None);
        }
        let mut last = self.eval_statement(first.trim()).await?;
        for line in lines {
            last = self.eval_statement(line.trim()).await?;
        }
        Ok(last)
    }

    async fn eval_statement(&mut self, statement: &str) -> Result<Option<Val>, Raised> {
        if statement == "await sleep()" {
            tokio::task::yield_now().await;
            return Ok(None);
        }
        if let Some(message) = statement.strip_prefix("raise ") {
            return Err(Raised::exception("Exception", message.trim()));
        }
        if let Some(message) = statement.strip_prefix("raise_untraced ") {
            let raised = Raised::exception("Exception", message.trim());
            return Err(Raised { traceback: None, ..raised });
        }
        if let Some(message) = statement.strip_prefix("raise_blank ") {
            let raised = Raised::exception("Exception", message.trim());
            return Err(Raised {
                traceback: Some(" \n".to_owned()),
                ..raised
            });
        }
        if let Some(arg) = statement.strip_prefix("print(").and_then(|rest| rest.strip_suffix(')')) {
            let text = match self.eval_expr(arg.trim())? {
                Val::None => "None".to_owned(),
                Val::Int(n) => n.to_string(),
                Val::Str(s) => s,
                Val::Object(repr) => repr,
            };
            self.print(&text);
            return Ok(None);
        }
        if let Some((name, expr)) = statement.split_once(" = ") {
            let val = self.eval_expr(expr.trim())?;
            self.globals.insert(name.trim().to_owned(), val);
            return Ok(None);
        }
        self.eval_expr(statement).map(Some)
    }

    fn eval_expr(&mut self, expr: &str) -> Result<Val, Raised> {
        if expr == "fault()" {
            return Err(Raised::fault("fatal error in the runtime"));
        }
        if expr == "object()" {
            return Ok(Val::Object("<object>".to_owned()));
        }
        if expr == "readline()" {
            let line = self.bridge()?.readline().map_err(|err| Raised::exception("OSError", &err.to_string()))?;
            return Ok(Val::Str(line));
        }
        if let Some(arg) = expr.strip_prefix("input(").and_then(|rest| rest.strip_suffix(')')) {
            let prompt = match self.eval_expr(arg.trim())? {
                Val::Str(s) => s,
                _ => String::new(),
            };
            let line = self
                .bridge()?
                .get_input(&prompt)
                .map_err(|err| Raised::exception("OSError", &err.to_string()))?;
            return Ok(Val::Str(line));
        }
        if let Ok(n) = expr.parse::<i64>() {
            return Ok(Val::Int(n));
        }
        if expr.len() >= 2
            && ((expr.starts_with('"') && expr.ends_with('"')) || (expr.starts_with('\'') && expr.ends_with('\'')))
        {
            return Ok(Val::Str(expr[1..expr.len() - 1].to_owned()));
        }
        if expr.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') && !expr.is_empty() {
            return self
                .globals
                .get(expr)
                .cloned()
                .ok_or_else(|| Raised::exception("NameError", &format!("name '{expr}' is not defined")));
        }
        Err(Raised::exception("SyntaxError", "invalid syntax"))
    }
}

/// Classifies buffered console source.
pub fn syntax_check(source: &str) -> SyntaxCheck {
    let mut balance = 0i32;
    for ch in source.chars() {
        match ch {
            '(' | '[' | '{' => balance += 1,
            ')' | ']' | '}' => balance -= 1,
            _ => {}
        }
        if balance < 0 {
            return SyntaxCheck::SyntaxError;
        }
    }
    if source.contains('$') {
        return SyntaxCheck::SyntaxError;
    }
    if balance > 0 || source.trim_end().ends_with('\\') {
        return SyntaxCheck::Incomplete;
    }
    let opens_block = source
        .lines()
        .find(|line| !line.trim().is_empty())
        .is_some_and(|line| line.trim_end().ends_with(':'));
    let last_line_blank = source.rsplit('\n').next().is_some_and(|line| line.trim().is_empty());
    if opens_block && !last_line_blank {
        return SyntaxCheck::Incomplete;
    }
    SyntaxCheck::Complete
}

impl VirtualFs for FakeRuntime {
    fn read(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| RuntimeError::fault(format!("ENOENT: {path}")))
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<(), RuntimeError> {
        self.files.insert(path.to_owned(), data.to_vec());
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> Result<(), RuntimeError> {
        if !self.dirs.insert(path.to_owned()) {
            return Err(RuntimeError::fault(format!("EEXIST: {path}")));
        }
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<(), RuntimeError> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        if self.files.keys().any(|file| file.starts_with(&prefix)) {
            return Err(RuntimeError::fault(format!("ENOTEMPTY: {path}")));
        }
        if !self.dirs.remove(path) {
            return Err(RuntimeError::fault(format!("ENOENT: {path}")));
        }
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> Result<(), RuntimeError> {
        self.files
            .remove(path)
            .map(drop)
            .ok_or_else(|| RuntimeError::fault(format!("ENOENT: {path}")))
    }
}

impl Runtime for FakeRuntime {
    type Value = FakeValue;
    type Namespace = FakeNamespace;
    type Object = FakeObject;
    type Pending = FakePending;
    type Awaitable = FakeAwaitable;

    fn version(&self) -> String {
        FAKE_VERSION.to_owned()
    }

    fn set_stdout(&mut self, relay: StdoutRelay) {
        self.stdout = Some(relay);
    }

    async fn load_packages(&mut self, packages: &[String]) -> Result<(), RuntimeError> {
        tokio::task::yield_now().await;
        if let Some(FailPoint::LoadPackage(name)) = self.fixture.fail.borrow().as_ref()
            && packages.contains(name)
        {
            return Err(RuntimeError::fault(format!("no known package named '{name}'")));
        }
        self.fixture.journal.borrow_mut().loaded.push(packages.to_vec());
        Ok(())
    }

    async fn install_packages(&mut self, installer: &str, packages: &[String]) -> Result<(), RuntimeError> {
        tokio::task::yield_now().await;
        if self.fixture.fails_at(&FailPoint::Install) {
            return Err(RuntimeError::Exception(InterpreterException::new(
                "ValueError: Can't find a pure Python 3 wheel",
            )));
        }
        self.fixture
            .journal
            .borrow_mut()
            .installed
            .push((installer.to_owned(), packages.to_vec()));
        Ok(())
    }

    fn register_module(&mut self, name: &str, bridge: Rc<InputBridge>) -> Result<(), RuntimeError> {
        self.fixture.journal.borrow_mut().modules.push(name.to_owned());
        *self.fixture.bridge.borrow_mut() = Some(bridge);
        Ok(())
    }

    fn new_namespace(&mut self) -> Result<FakeNamespace, RuntimeError> {
        self.next_namespace += 1;
        Ok(Handle::new(&self.fixture, Kind::Namespace, self.next_namespace))
    }

    fn namespace_get(&mut self, namespace: &FakeNamespace, name: &str) -> Result<Option<FakeObject>, RuntimeError> {
        if !self.populated.contains(&namespace.inner) {
            return Ok(None);
        }
        if let Some(FailPoint::MissingHelper(missing)) = self.fixture.fail.borrow().as_ref()
            && *missing == name
        {
            return Ok(None);
        }
        let binding = match name {
            "pyconsole" => Binding::Console,
            "await_fut" => Binding::AwaitFut,
            "repr_shorten" => Binding::ReprShorten,
            "clear_console" => Binding::ClearConsole,
            "BANNER" => Binding::Banner(FAKE_BANNER.to_owned()),
            _ => return Ok(None),
        };
        Ok(Some(Handle::new(&self.fixture, Kind::Object, binding)))
    }

    async fn run_async(
        &mut self,
        code: &str,
        namespace: Option<&FakeNamespace>,
    ) -> Result<Option<FakeValue>, RuntimeError> {
        tokio::task::yield_now().await;
        let is_bootstrap = namespace.is_some() || code.starts_with("import pyodide_http") || code.contains("builtins.input");
        if is_bootstrap {
            if self.fixture.fails_at(&FailPoint::Snippet) {
                return Err(RuntimeError::Exception(InterpreterException::new(
                    "ModuleNotFoundError: No module named 'pyodide_http'",
                )));
            }
            let patch_loaded = self
                .fixture
                .journal
                .borrow()
                .loaded
                .iter()
                .flatten()
                .any(|package| package == "pyodide-http");
            if code.contains("import pyodide_http") && !patch_loaded {
                return Err(RuntimeError::Exception(InterpreterException::new(
                    "ModuleNotFoundError: No module named 'pyodide_http'",
                )));
            }
            self.fixture.journal.borrow_mut().snippets.push(Snippet {
                code: code.to_owned(),
                namespaced: namespace.is_some(),
            });
            if let Some(namespace) = namespace {
                self.populated.insert(namespace.inner);
            }
            return Ok(None);
        }
        match self.eval_source(code).await {
            Ok(val) => Ok(val.map(|val| self.value(val))),
            Err(raised) => Err(raised.error),
        }
    }

    fn object_text(&self, object: &FakeObject) -> Option<String> {
        match &object.inner {
            Binding::Banner(text) => Some(text.clone()),
            _ => None,
        }
    }

    fn invoke(&mut self, function: &FakeObject, args: &[&str]) -> Result<Option<String>, RuntimeError> {
        match &function.inner {
            Binding::ClearConsole => {
                self.buffer.clear();
                Ok(None)
            }
            Binding::ReprShorten => {
                let text = args.first().copied().unwrap_or_default();
                if text.chars().count() <= 20 {
                    return Ok(Some(text.to_owned()));
                }
                let chars: Vec<char> = text.chars().collect();
                let head: String = chars[..8].iter().collect();
                let tail: String = chars[chars.len() - 8..].iter().collect();
                Ok(Some(format!("{head}...{tail}")))
            }
            other => Err(RuntimeError::fault(format!("{other:?} is not callable"))),
        }
    }

    fn push_line(&mut self, console: &FakeObject, line: &str) -> Result<FakePending, RuntimeError> {
        if console.inner != Binding::Console {
            return Err(RuntimeError::fault("push called on a non-console object"));
        }
        self.buffer.push(line.to_owned());
        let source = self.buffer.join("\n");
        let verdict = syntax_check(&source);
        let plan = match verdict {
            SyntaxCheck::Incomplete => LinePlan::Buffered,
            SyntaxCheck::Complete => LinePlan::Run(source),
            SyntaxCheck::SyntaxError => LinePlan::SyntaxError(source),
        };
        if verdict != SyntaxCheck::Incomplete {
            self.buffer.clear();
        }
        Ok(Handle::new(
            &self.fixture,
            Kind::Pending,
            PendingLine {
                verdict,
                plan,
                formatted_error: Rc::new(RefCell::new(None)),
            },
        ))
    }

    fn syntax_check(&self, pending: &FakePending) -> SyntaxCheck {
        pending.inner.verdict
    }

    fn formatted_error(&self, pending: &FakePending) -> Option<String> {
        pending.inner.formatted_error.borrow().clone()
    }

    fn await_pending(&mut self, helper: &FakeObject, pending: &FakePending) -> Result<FakeAwaitable, RuntimeError> {
        if helper.inner != Binding::AwaitFut {
            return Err(RuntimeError::fault("await helper is not callable"));
        }
        Ok(Handle::new(
            &self.fixture,
            Kind::Awaitable,
            AwaitPlan {
                plan: pending.inner.plan.clone(),
                formatted_error: Rc::clone(&pending.inner.formatted_error),
            },
        ))
    }

    async fn settle(&mut self, awaitable: &FakeAwaitable) -> Result<Vec<FakeValue>, RuntimeError> {
        let outcome = match &awaitable.inner.plan {
            LinePlan::Buffered => Ok(None),
            LinePlan::Run(source) => {
                let source = source.clone();
                self.eval_source(&source).await
            }
            LinePlan::SyntaxError(source) => {
                let offending = source.lines().last().unwrap_or_default().to_owned();
                Err(Raised {
                    error: RuntimeError::Exception(InterpreterException::new("SyntaxError: invalid syntax")),
                    traceback: Some(format!(
                        "  File \"<console>\", line 1\n    {offending}\n    ^\nSyntaxError: invalid syntax\n"
                    )),
                })
            }
        };
        match outcome {
            Ok(val) => Ok(vec![self.value(val.unwrap_or(Val::None))]),
            Err(raised) => {
                *awaitable.inner.formatted_error.borrow_mut() = raised.traceback;
                Err(raised.error)
            }
        }
    }

    fn is_proxy(&self, value: &FakeValue) -> bool {
        value.proxy.is_some()
    }

    fn export(&self, value: &FakeValue) -> serde_json::Value {
        match &value.val {
            Val::None => serde_json::Value::Null,
            Val::Int(n) => serde_json::Value::from(*n),
            Val::Str(s) => serde_json::Value::from(s.as_str()),
            Val::Object(repr) => serde_json::json!({ "repr": repr }),
        }
    }
}
