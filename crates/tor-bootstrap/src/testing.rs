//! A scriptable [`NativeClient`] for tests.
//!
//! [`FakeClient`] records how it was used, and does whatever it was last told
//! to do when started.  It can also be told to hold every start call until
//! released, so that tests can pile up concurrent callers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crate::loader::LoadFailure;
use crate::native::{NativeClient, NativeFailure, NativeOutcome};
use crate::workdir::WorkingDirectory;

/// What a [`FakeClient`] does when loaded.
#[derive(Clone, Debug)]
enum LoadScript {
    /// Load successfully.
    Succeed,
    /// Fail with this message.
    Fail(String),
    /// Panic with this message.
    Panic(String),
}

/// What a [`FakeClient`] does when started.
#[derive(Clone, Debug)]
enum Script {
    /// Return this status string.
    Respond(String),
    /// Raise this failure.
    Raise(NativeFailure),
    /// Panic with this message.
    Panic(String),
}

/// A [`NativeClient`] that does what it's told.
#[derive(Debug)]
pub struct FakeClient {
    /// How many times `load` was called.
    load_calls: AtomicUsize,
    /// How many times `start` was called.
    start_calls: AtomicUsize,
    /// What `load` does.
    load_script: Mutex<LoadScript>,
    /// What `start` does.
    script: Mutex<Script>,
    /// While true, `start` blocks before doing anything.
    held: Mutex<bool>,
    /// Signalled when `held` becomes false.
    released: Condvar,
    /// The target and working directory of the last `start` call.
    last_start: Mutex<Option<(Option<String>, PathBuf)>>,
}

impl FakeClient {
    /// Return a new client that loads and starts successfully.
    pub fn new() -> Self {
        FakeClient {
            load_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            load_script: Mutex::new(LoadScript::Succeed),
            script: Mutex::new(Script::Respond(
                "Tor client initialized successfully.".to_owned(),
            )),
            held: Mutex::new(false),
            released: Condvar::new(),
            last_start: Mutex::new(None),
        }
    }

    /// Make later loads fail with `message`.
    pub fn fail_load(&self, message: &str) {
        *self.load_script.lock().expect("Poisoned lock") = LoadScript::Fail(message.to_owned());
    }

    /// Make later loads panic with `message`.
    pub fn panic_on_load(&self, message: &str) {
        *self.load_script.lock().expect("Poisoned lock") = LoadScript::Panic(message.to_owned());
    }

    /// Make later loads succeed.
    pub fn succeed_load(&self) {
        *self.load_script.lock().expect("Poisoned lock") = LoadScript::Succeed;
    }

    /// Make later starts return `text`.
    pub fn respond_with(&self, text: &str) {
        self.set_script(Script::Respond(text.to_owned()));
    }

    /// Make later starts raise a failure with `message`.
    pub fn raise(&self, message: &str) {
        self.set_script(Script::Raise(NativeFailure::new(message)));
    }

    /// Make later starts panic with `message`.
    pub fn panic_on_start(&self, message: &str) {
        self.set_script(Script::Panic(message.to_owned()));
    }

    /// Make later starts block until [`release`](FakeClient::release).
    pub fn hold(&self) {
        *self.held.lock().expect("Poisoned lock") = true;
    }

    /// Let held starts proceed.
    pub fn release(&self) {
        *self.held.lock().expect("Poisoned lock") = false;
        self.released.notify_all();
    }

    /// Return how many times `load` has been called.
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Return how many times `start` has been called.
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Return the target passed to the last `start`, if any.
    pub fn last_target(&self) -> Option<String> {
        self.last_start
            .lock()
            .expect("Poisoned lock")
            .as_ref()
            .and_then(|(target, _)| target.clone())
    }

    /// Return the working directory passed to the last `start`, if any.
    pub fn last_workdir(&self) -> Option<PathBuf> {
        self.last_start
            .lock()
            .expect("Poisoned lock")
            .as_ref()
            .map(|(_, dir)| dir.clone())
    }

    /// Replace the script.
    fn set_script(&self, script: Script) {
        *self.script.lock().expect("Poisoned lock") = script;
    }
}

impl Default for FakeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeClient for FakeClient {
    fn load(&self) -> Result<(), LoadFailure> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.load_script.lock().expect("Poisoned lock").clone();
        match script {
            LoadScript::Succeed => Ok(()),
            LoadScript::Fail(msg) => Err(LoadFailure::new(msg)),
            LoadScript::Panic(msg) => panic!("{}", msg),
        }
    }

    fn start(&self, target: Option<&str>, workdir: &WorkingDirectory) -> NativeOutcome {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_start.lock().expect("Poisoned lock") =
            Some((target.map(str::to_owned), workdir.path().to_owned()));

        let held = self.held.lock().expect("Poisoned lock");
        drop(
            self.released
                .wait_while(held, |held| *held)
                .expect("Poisoned lock"),
        );

        let script = self.script.lock().expect("Poisoned lock").clone();
        match script {
            Script::Respond(text) => NativeOutcome::Returned(text),
            Script::Raise(f) => NativeOutcome::Raised(f),
            Script::Panic(msg) => panic!("{}", msg),
        }
    }
}
