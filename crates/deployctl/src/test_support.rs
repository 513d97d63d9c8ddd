//! Scripted stand-in for the external CLIs, shared by unit and integration tests.
//! Responses are keyed by a command-line prefix; every call is recorded so tests
//! can assert on ordering and on what was (or was not) executed.
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Mutex;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};

struct Rule { prefix: String, outputs: VecDeque<CommandOutput> }

#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self { Self::default() }

    /// Answer every command starting with `prefix` with `output`.
    pub fn on(self, prefix: &str, output: CommandOutput) -> Self { self.on_seq(prefix, vec![output]) }

    /// Answer successive matching calls in order; the last output repeats.
    pub fn on_seq(self, prefix: &str, outputs: Vec<CommandOutput>) -> Self {
        self.rules.lock().unwrap().push(Rule { prefix: prefix.to_string(), outputs: outputs.into() });
        self
    }

    /// Rendered command lines, in call order.
    pub fn calls(&self) -> Vec<String> { self.calls.lock().unwrap().iter().map(|c| c.to_string()).collect() }

    pub fn specs(&self) -> Vec<CommandSpec> { self.calls.lock().unwrap().clone() }

    /// Index of the first call starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> { self.calls().iter().position(|c| c.starts_with(prefix)) }

    pub fn count(&self, prefix: &str) -> usize { self.calls().iter().filter(|c| c.starts_with(prefix)).count() }

    /// Stdin payloads of all calls starting with `prefix`.
    pub fn stdin_of(&self, prefix: &str) -> Vec<String> {
        self.calls.lock().unwrap().iter().filter(|c| c.to_string().starts_with(prefix)).filter_map(|c| c.stdin.clone()).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let line = spec.to_string();
        self.calls.lock().unwrap().push(spec.clone());
        let mut rules = self.rules.lock().unwrap();
        // longest matching prefix wins so specific rules can override general ones
        let rule = rules.iter_mut().filter(|r| line.starts_with(&r.prefix)).max_by_key(|r| r.prefix.len());
        let out = match rule {
            Some(r) if r.outputs.len() > 1 => r.outputs.pop_front().unwrap_or_default(),
            Some(r) => r.outputs.front().cloned().unwrap_or_default(),
            None => CommandOutput::ok(""),
        };
        Ok(out)
    }
}
