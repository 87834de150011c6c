//! Module manager: modules, contexts and re-resolution for one project.
//!
//! The manager owns every module and context of a project. `update()` runs
//! source discovery, then resolves every dirty context and validates every
//! module of unknown validity in a single worker launch. Results reach the
//! updating thread through a bounded channel and are folded into the
//! representations under the state lock.
//!
//! At most one update runs per project; a concurrent call fails with
//! [`Error::Busy`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashSet;

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::execute::{
    ProcessRunner, ProgressController, RunRequest, RunResult, SnippetStep, TracingObserver,
};
use crate::ipc::{ContextQuery, ModuleQuery, ModuleSpec, SnippetPayload};
use crate::model::{
    BindingCodeLocation, BindingKey, ModuleContextRepresentation, ModuleRepresentation, Validity,
    default_context_name,
};
use crate::problem::{CodeProblem, merge_problems};
use crate::project::ProjectHandle;
use crate::sink::Collaborators;
use crate::source::{
    ContextDefinition, ContextStrategy, DiscoveredModule, FileSource, ModuleStrategy, Source,
};

use super::report::{ContextOutcome, ContextStatus, ModuleOutcome, UpdateReport};

/// Where a context came from. Discovery only rewrites contexts it created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    User,
    Discovered,
    Inferred,
}

struct ContextEntry {
    context: ModuleContextRepresentation,
    origin: Origin,
}

impl ContextEntry {
    fn edit(&mut self, change: impl FnOnce(&mut ModuleContextRepresentation) -> bool) -> bool {
        let changed = change(&mut self.context);
        if changed {
            self.origin = Origin::User;
        }
        changed
    }
}

#[derive(Default)]
struct ManagerState {
    modules: BTreeMap<String, ModuleRepresentation>,
    contexts: BTreeMap<String, ContextEntry>,
    interesting_keys: BTreeSet<BindingKey>,
    /// Bumped whenever the interesting keys change.
    keys_generation: u64,
}

impl ManagerState {
    fn dirty_containing(&mut self, module: &str) {
        for entry in self.contexts.values_mut() {
            if entry.context.contains(module) {
                entry.context.mark_dirty();
            }
        }
    }

    fn dirty_all(&mut self) {
        for entry in self.contexts.values_mut() {
            entry.context.mark_dirty();
        }
    }

    /// Modules that discovery found before but no longer finds.
    fn is_vanished(&self, module: &str) -> bool {
        self.modules.get(module).is_some_and(|m| !m.is_locatable())
    }

    fn in_any_context(&self, module: &str) -> bool {
        self.contexts.values().any(|e| e.context.contains(module))
    }
}

/// What a step's result belongs to.
#[derive(Debug, Clone)]
enum Target {
    Module(String),
    Context {
        name: String,
        generation: u64,
        keys_generation: u64,
    },
}

struct InFlight {
    runner: Arc<ProcessRunner>,
    controller: ProgressController,
}

/// Cancels the update running on a [`ModuleManager`], from any thread.
#[derive(Clone)]
pub struct CancelHandle {
    in_flight: Arc<Mutex<Option<InFlight>>>,
}

impl CancelHandle {
    /// Cancel the running batch. Returns false when nothing was running.
    pub fn cancel(&self) -> bool {
        let running = lock(&self.in_flight)
            .as_ref()
            .map(|f| (f.runner.clone(), f.controller.clone()));
        match running {
            Some((runner, controller)) => {
                controller.cancel();
                runner.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.in_flight).is_some()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the busy flag on drop.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool, project: &str) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::Busy {
                project: project.to_string(),
            })?;
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owner of all modules and module contexts of one project.
pub struct ModuleManager {
    project: ProjectHandle,
    worker: WorkerConfig,
    collaborators: Collaborators,
    modules_source: Arc<dyn Source<DiscoveredModule>>,
    contexts_source: Arc<dyn Source<ContextDefinition>>,
    state: Mutex<ManagerState>,
    busy: AtomicBool,
    launches: AtomicUsize,
    in_flight: Arc<Mutex<Option<InFlight>>>,
}

impl ModuleManager {
    /// Manager discovering modules and contexts from the project's files.
    pub fn new(project: ProjectHandle, worker: WorkerConfig, collaborators: Collaborators) -> Self {
        let interesting_keys = project
            .config()
            .interesting_keys
            .iter()
            .map(|k| BindingKey::parse(k))
            .collect();

        Self {
            project,
            worker,
            collaborators,
            modules_source: Arc::new(FileSource::new(ModuleStrategy)),
            contexts_source: Arc::new(FileSource::new(ContextStrategy)),
            state: Mutex::new(ManagerState {
                interesting_keys,
                ..ManagerState::default()
            }),
            busy: AtomicBool::new(false),
            launches: AtomicUsize::new(0),
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the discovery sources.
    pub fn with_sources(
        mut self,
        modules: Arc<dyn Source<DiscoveredModule>>,
        contexts: Arc<dyn Source<ContextDefinition>>,
    ) -> Self {
        self.modules_source = modules;
        self.contexts_source = contexts;
        self
    }

    pub fn project(&self) -> &ProjectHandle {
        &self.project
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        lock(&self.state)
    }

    // ---- queries ----

    pub fn modules(&self) -> Vec<ModuleRepresentation> {
        self.state().modules.values().cloned().collect()
    }

    pub fn module(&self, name: &str) -> Option<ModuleRepresentation> {
        self.state().modules.get(name).cloned()
    }

    /// Snapshots of all contexts, by name.
    pub fn module_contexts(&self) -> Vec<ModuleContextRepresentation> {
        self.state().contexts.values().map(|e| e.context.clone()).collect()
    }

    pub fn module_context(&self, name: &str) -> Option<ModuleContextRepresentation> {
        self.state().contexts.get(name).map(|e| e.context.clone())
    }

    /// Where `key` is bound in context `context`, as of the last resolution.
    pub fn find_location(
        &self,
        context: &str,
        key: &str,
        annotation: Option<&str>,
    ) -> Result<Option<BindingCodeLocation>> {
        let state = self.state();
        let entry = state
            .contexts
            .get(context)
            .ok_or_else(|| Error::ContextNotFound(context.to_string()))?;
        Ok(entry.context.find_location(key, annotation).cloned())
    }

    pub fn interesting_keys(&self) -> Vec<BindingKey> {
        self.state().interesting_keys.iter().cloned().collect()
    }

    // ---- module membership ----

    /// Track `module`, replacing one of the same name. Contexts containing
    /// it become dirty when anything changed.
    pub fn add_module(&self, module: ModuleRepresentation) -> bool {
        let mut state = self.state();
        let name = module.name().to_string();
        if state.modules.get(&name) == Some(&module) {
            return false;
        }
        state.modules.insert(name.clone(), module);
        state.dirty_containing(&name);
        true
    }

    /// Track a module by name. No-op if it is already known.
    pub fn add_module_by_name(&self, name: &str) -> bool {
        let mut state = self.state();
        if state.modules.contains_key(name) {
            return false;
        }
        state.modules.insert(name.to_string(), ModuleRepresentation::new(name));
        state.dirty_containing(name);
        true
    }

    /// Stop tracking a module and drop it from every context. No-op if absent.
    pub fn remove_module(&self, name: &str) -> bool {
        let mut state = self.state();
        let known = state.modules.remove(name).is_some();
        let mut removed = known;
        for entry in state.contexts.values_mut() {
            removed |= entry.context.remove_module(name);
        }
        removed
    }

    pub fn clear_modules(&self) {
        let mut state = self.state();
        let names: Vec<String> = state.modules.keys().cloned().collect();
        state.modules.clear();
        for entry in state.contexts.values_mut() {
            for name in &names {
                entry.context.remove_module(name);
            }
        }
    }

    // ---- context membership ----

    /// Add a user context, replacing any context of the same name.
    pub fn add_module_context(&self, context: ModuleContextRepresentation) {
        let mut context = context;
        context.mark_dirty();
        self.state().contexts.insert(
            context.name().to_string(),
            ContextEntry {
                context,
                origin: Origin::User,
            },
        );
    }

    /// Add an empty user context. No-op if the name is taken.
    pub fn add_module_context_by_name(&self, name: &str) -> bool {
        let mut state = self.state();
        if state.contexts.contains_key(name) {
            return false;
        }
        state.contexts.insert(
            name.to_string(),
            ContextEntry {
                context: ModuleContextRepresentation::new(name),
                origin: Origin::User,
            },
        );
        true
    }

    pub fn remove_module_context(&self, name: &str) -> bool {
        self.state().contexts.remove(name).is_some()
    }

    pub fn clear_module_contexts(&self) {
        self.state().contexts.clear();
    }

    /// Add `module` to context `context`. No-op if the context is unknown.
    /// An edited context is owned by the user from then on.
    pub fn add_module_to_context(&self, context: &str, module: ModuleSpec) -> bool {
        match self.state().contexts.get_mut(context) {
            Some(entry) => entry.edit(|c| c.add_module(module)),
            None => false,
        }
    }

    /// Add a known module to a context with the module's own arguments.
    /// No-op if either is unknown.
    pub fn add_module_to_context_by_name(&self, context: &str, module: &str) -> bool {
        let mut state = self.state();
        let Some(spec) = state.modules.get(module).map(|m| m.spec()) else {
            return false;
        };
        match state.contexts.get_mut(context) {
            Some(entry) => entry.edit(|c| c.add_module(spec)),
            None => false,
        }
    }

    pub fn remove_module_from_context(&self, context: &str, module: &str) -> bool {
        match self.state().contexts.get_mut(context) {
            Some(entry) => entry.edit(|c| c.remove_module(module)),
            None => false,
        }
    }

    // ---- interesting keys ----

    /// Report `key` for every context from now on. Dirties every context.
    pub fn add_interesting_key(&self, key: BindingKey) -> bool {
        let mut state = self.state();
        if !state.interesting_keys.insert(key) {
            return false;
        }
        state.keys_generation += 1;
        state.dirty_all();
        true
    }

    pub fn remove_interesting_key(&self, key: &BindingKey) -> bool {
        let mut state = self.state();
        if !state.interesting_keys.remove(key) {
            return false;
        }
        state.keys_generation += 1;
        state.dirty_all();
        true
    }

    // ---- update ----

    /// Worker processes started by this manager so far.
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            in_flight: self.in_flight.clone(),
        }
    }

    /// Refresh modules from source and/or re-resolve dirty contexts.
    ///
    /// Blocks until the batch finished. Fails with [`Error::Busy`] while
    /// another update of this project runs. The report is also published
    /// to the results sink.
    pub fn update(&self, update_modules: bool, update_contexts: bool) -> Result<UpdateReport> {
        let _guard = BusyGuard::acquire(&self.busy, self.project.name())?;
        let mut report = UpdateReport::new(self.project.name());

        if update_modules {
            self.refresh_sources()?;
        }
        if update_contexts {
            self.resolve(&mut report)?;
        }

        tracing::info!("{}", report.summary());
        self.collaborators.results.publish(&report);
        Ok(report)
    }

    fn refresh_sources(&self) -> Result<()> {
        let discovered = self.modules_source.discover(&self.project)?;
        let definitions = self.contexts_source.discover(&self.project)?;
        tracing::debug!(
            "{}: discovered {} module(s), {} context definition(s)",
            self.project.name(),
            discovered.len(),
            definitions.len()
        );

        let mut state = self.state();

        let mut seen = FxHashSet::default();
        for module in discovered {
            if !seen.insert(module.name.clone()) {
                tracing::warn!("Module {} defined twice; using the first", module.name);
                continue;
            }
            match state.modules.get_mut(&module.name) {
                Some(existing) => {
                    let reappeared = !existing.is_locatable();
                    existing.set_locatable(true);
                    if existing.refresh_fingerprint(module.fingerprint) || reappeared {
                        state.dirty_containing(&module.name);
                    }
                }
                None => {
                    let representation =
                        ModuleRepresentation::new(module.name.clone()).with_fingerprint(module.fingerprint);
                    state.modules.insert(module.name.clone(), representation);
                    state.dirty_containing(&module.name);
                }
            }
        }

        // Only modules discovery found before can vanish; user-added ones stay.
        let vanished: Vec<String> = state
            .modules
            .values()
            .filter(|m| m.fingerprint().is_some() && m.is_locatable() && !seen.contains(m.name()))
            .map(|m| m.name().to_string())
            .collect();
        for name in vanished {
            tracing::debug!("Module {} no longer found in source", name);
            if let Some(module) = state.modules.get_mut(&name) {
                module.set_locatable(false);
            }
            state.dirty_containing(&name);
        }

        self.sync_context_definitions(&mut state, definitions);
        if self.project.config().infer_default_contexts {
            infer_default_contexts(&mut state);
        }
        Ok(())
    }

    fn sync_context_definitions(&self, state: &mut ManagerState, definitions: Vec<ContextDefinition>) {
        let mut defined = FxHashSet::default();
        for definition in definitions {
            if !defined.insert(definition.name.clone()) {
                tracing::warn!(
                    "Context {:?} defined twice; ignoring {}",
                    definition.name,
                    definition.path.display()
                );
                continue;
            }
            match state.contexts.get_mut(&definition.name) {
                Some(entry) if entry.origin == Origin::User => {
                    tracing::debug!("Keeping user context {:?} over its definition", definition.name);
                }
                Some(entry) => {
                    entry.origin = Origin::Discovered;
                    if entry.context.members() != definition.modules.as_slice() {
                        entry.context.clear_modules();
                        for module in definition.modules {
                            entry.context.add_module(module);
                        }
                    }
                }
                None => {
                    let context =
                        ModuleContextRepresentation::with_modules(definition.name.clone(), definition.modules);
                    state.contexts.insert(
                        definition.name,
                        ContextEntry {
                            context,
                            origin: Origin::Discovered,
                        },
                    );
                }
            }
        }

        state
            .contexts
            .retain(|name, entry| entry.origin != Origin::Discovered || defined.contains(name));
    }

    fn resolve(&self, report: &mut UpdateReport) -> Result<()> {
        let (targets, requests) = self.plan(report);
        if requests.is_empty() {
            self.prune_vanished();
            return Ok(());
        }

        let label = format!("Resolving bindings for {}", self.project.name());
        let runner = Arc::new(
            ProcessRunner::new(self.worker.clone(), self.project.classpath())
                .with_collaborators(&self.collaborators),
        );
        let controller = ProgressController::new();
        controller.add_observer(Arc::new(TracingObserver));

        let (tx, rx) = sync_channel(targets.len());
        for (index, (target, request)) in targets.iter().zip(requests).enumerate() {
            let step_label = request.label().to_string();
            runner.queue(request)?;
            controller.step(Arc::new(SnippetStep::new(
                step_label,
                runner.clone(),
                index,
                target.clone(),
                tx.clone(),
            )))?;
        }
        drop(tx);

        *lock(&self.in_flight) = Some(InFlight {
            runner: runner.clone(),
            controller: controller.clone(),
        });
        let started = self.start(&runner, &controller, &label);
        if let Err(e) = started {
            *lock(&self.in_flight) = None;
            return Err(e);
        }

        for _ in 0..targets.len() {
            let Ok((target, result)) = rx.recv() else { break };
            // The runner already published launch and crash diagnostics.
            let reported = runner.launch_failure().is_some()
                || runner
                    .crash()
                    .is_some_and(|crash| result.problems().contains(&crash));
            self.apply(report, target, result, reported);
        }

        let outcome = controller.wait_for();
        let status = runner.wait_for();
        *lock(&self.in_flight) = None;

        report.launched = true;
        report.cancelled = outcome.cancelled || runner.is_cancelled();
        tracing::debug!("{}: batch finished with {:?}", self.project.name(), status);

        self.prune_vanished();
        Ok(())
    }

    fn start(&self, runner: &ProcessRunner, controller: &ProgressController, label: &str) -> Result<()> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        match runner.run(label, true) {
            Ok(()) => {}
            // Cancelled through the handle before the worker started.
            Err(Error::IllegalState(_)) if runner.is_cancelled() => {}
            Err(e) => return Err(e),
        }
        controller.go(label, true)
    }

    /// Build the batch: one validation per module of unknown validity, one
    /// resolution per dirty context. Dirty contexts without members resolve
    /// here without a worker.
    fn plan(&self, report: &mut UpdateReport) -> (Vec<Target>, Vec<RunRequest>) {
        let mut state = self.state();
        let mut targets = Vec::new();
        let mut requests = Vec::new();

        for module in state.modules.values() {
            if module.is_locatable() && module.validity() == Validity::Unknown {
                targets.push(Target::Module(module.name().to_string()));
                requests.push(RunRequest::module(&ModuleQuery { module: module.spec() }));
            }
        }

        let keys: Vec<BindingKey> = state.interesting_keys.iter().cloned().collect();
        let keys_generation = state.keys_generation;
        let vanished: FxHashSet<String> = state
            .modules
            .values()
            .filter(|m| !m.is_locatable())
            .map(|m| m.name().to_string())
            .collect();

        for entry in state.contexts.values_mut() {
            let context = &mut entry.context;
            if !context.is_dirty() {
                continue;
            }
            let modules: Vec<ModuleSpec> = context
                .members()
                .iter()
                .filter(|m| !vanished.contains(&m.name))
                .cloned()
                .collect();

            if modules.is_empty() {
                context.apply_resolution(Vec::new());
                context.prune_members(|m| !vanished.contains(m));
                report.contexts.push(ContextOutcome {
                    name: context.name().to_string(),
                    status: ContextStatus::Resolved,
                    bindings: 0,
                });
                continue;
            }

            targets.push(Target::Context {
                name: context.name().to_string(),
                generation: context.generation(),
                keys_generation,
            });
            requests.push(RunRequest::module_context(&ContextQuery {
                name: context.name().to_string(),
                modules,
                keys: keys.clone(),
            }));
        }

        (targets, requests)
    }

    fn apply(&self, report: &mut UpdateReport, target: Target, result: RunResult, reported: bool) {
        match target {
            Target::Module(name) => self.apply_module(report, &name, result, reported),
            Target::Context {
                name,
                generation,
                keys_generation,
            } => {
                let status = self.apply_context(&name, generation, keys_generation, result, reported);
                let bindings = self
                    .state()
                    .contexts
                    .get(&name)
                    .map_or(0, |e| e.context.bindings().len());
                report.contexts.push(ContextOutcome { name, status, bindings });
            }
        }
    }

    fn apply_module(&self, report: &mut UpdateReport, name: &str, result: RunResult, reported: bool) {
        let mut state = self.state();
        let Some(module) = state.modules.get_mut(name) else {
            return;
        };

        match result {
            RunResult::Success(SnippetPayload::Module(outcome)) => {
                if outcome.is_valid() {
                    module.set_validity(Validity::Valid, Vec::new());
                } else {
                    self.collaborators.problems.push(&outcome.problems);
                    module.set_validity(Validity::Broken, outcome.problems);
                }
            }
            RunResult::Success(other) => {
                let problem = CodeProblem::generic(format!("unexpected module result {:?}", other));
                self.collaborators.problems.push(std::slice::from_ref(&problem));
                module.set_validity(Validity::Unknown, vec![problem]);
            }
            RunResult::Failure(problems) => {
                if !reported {
                    self.collaborators.problems.push(&problems);
                }
                module.set_validity(Validity::Unknown, problems);
            }
            RunResult::Cancelled => return,
        }

        report.modules.push(ModuleOutcome {
            name: name.to_string(),
            validity: module.validity(),
            problems: module.problems().to_vec(),
        });
    }

    fn apply_context(
        &self,
        name: &str,
        generation: u64,
        keys_generation: u64,
        result: RunResult,
        reported: bool,
    ) -> ContextStatus {
        let mut state = self.state();
        let current_keys = state.keys_generation;
        let Some(entry) = state.contexts.get_mut(name) else {
            return ContextStatus::Stale;
        };
        if entry.context.generation() != generation || current_keys != keys_generation {
            tracing::debug!("Discarding result for {:?}: context changed during the batch", name);
            entry.context.mark_dirty();
            return ContextStatus::Stale;
        }

        let problems = match result {
            RunResult::Success(SnippetPayload::ModuleContext(outcome)) if outcome.problems.is_empty() => {
                if outcome.name != name {
                    tracing::warn!("Result for {:?} arrived labelled {:?}", name, outcome.name);
                }
                let binding_problems: Vec<CodeProblem> = outcome
                    .bindings
                    .iter()
                    .flat_map(|b| b.problems().iter().cloned())
                    .collect();
                entry.context.apply_resolution(outcome.bindings);
                drop(state);
                self.collaborators.problems.push(&binding_problems);
                self.prune_context(name);
                return ContextStatus::Resolved;
            }
            RunResult::Success(SnippetPayload::ModuleContext(outcome)) => outcome.problems,
            RunResult::Success(other) => {
                vec![CodeProblem::generic(format!("unexpected context result {:?}", other))]
            }
            RunResult::Failure(problems) => problems,
            RunResult::Cancelled => return ContextStatus::Cancelled,
        };

        entry.context.apply_failure(problems.clone());
        for problem in &problems {
            if let Some(module) = problem.invalid_module_name()
                && let Some(module) = state.modules.get_mut(module)
            {
                let mut module_problems = module.problems().to_vec();
                merge_problems(&mut module_problems, [problem.clone()]);
                module.set_validity(Validity::Broken, module_problems);
            }
        }
        drop(state);
        if !reported {
            self.collaborators.problems.push(&problems);
        }
        ContextStatus::Failed(problems)
    }

    /// Forget vanished members of a freshly resolved context.
    fn prune_context(&self, name: &str) {
        let mut state = self.state();
        let vanished: FxHashSet<String> = state
            .modules
            .values()
            .filter(|m| !m.is_locatable())
            .map(|m| m.name().to_string())
            .collect();
        if let Some(entry) = state.contexts.get_mut(name) {
            entry.context.prune_members(|m| !vanished.contains(m));
        }
    }

    /// Drop vanished modules no context refers to any more, and inferred
    /// contexts whose module vanished.
    fn prune_vanished(&self) {
        let mut state = self.state();
        let vanished: Vec<String> = state
            .modules
            .values()
            .filter(|m| !m.is_locatable())
            .map(|m| m.name().to_string())
            .collect();
        for name in vanished {
            let inferred = default_context_name(&name);
            if state
                .contexts
                .get(&inferred)
                .is_some_and(|e| e.origin == Origin::Inferred)
            {
                state.contexts.remove(&inferred);
            }
            if !state.in_any_context(&name) {
                state.modules.remove(&name);
            }
        }
    }
}

/// Give every locatable module that no context uses a context of its own.
fn infer_default_contexts(state: &mut ManagerState) {
    let orphans: Vec<ModuleSpec> = state
        .modules
        .values()
        .filter(|m| m.is_locatable() && !state.in_any_context(m.name()))
        .map(|m| m.spec())
        .collect();

    for module in orphans {
        let name = default_context_name(&module.name);
        if state.contexts.contains_key(&name) || state.is_vanished(&module.name) {
            continue;
        }
        tracing::debug!("Inferring context {:?}", name);
        state.contexts.insert(
            name.clone(),
            ContextEntry {
                context: ModuleContextRepresentation::with_modules(name, [module]),
                origin: Origin::Inferred,
            },
        );
    }
}
