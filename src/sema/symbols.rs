// SPDX-License-Identifier: PMPL-1.0-or-later

//! Σ: the global symbol table (phase P2, collection half).
//!
//! Built once, in deterministic module order, then read-only. Keys are
//! `module::…::name` paths. Builtin capability classes, the `Context`
//! record, and the async machinery are pre-registered so every assembly
//! sees the same ambient names.

use crate::diag::{Diagnostic, DiagnosticStream};
use crate::syntax::ast::{
    AstModule, ClassDecl, EnumDecl, ExternProc, Item, ModalDecl, ProcedureDecl, RecordDecl,
    StaticDecl, TypeAliasDecl, UsingDecl, Visibility,
};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum Declaration {
    Procedure(Rc<ProcedureDecl>),
    Record(Rc<RecordDecl>),
    Enum(Rc<EnumDecl>),
    Modal(Rc<ModalDecl>),
    Class(Rc<ClassDecl>),
    TypeAlias(Rc<TypeAliasDecl>),
    Static(Rc<StaticDecl>),
    ExternProc { abi: String, decl: Rc<ExternProc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Value,
    Type,
    Module,
    Class,
}

impl Declaration {
    pub fn kind(&self) -> EntityKind {
        match self {
            Declaration::Procedure(_) | Declaration::Static(_) | Declaration::ExternProc { .. } => {
                EntityKind::Value
            }
            Declaration::Record(_)
            | Declaration::Enum(_)
            | Declaration::Modal(_)
            | Declaration::TypeAlias(_) => EntityKind::Type,
            Declaration::Class(_) => EntityKind::Class,
        }
    }
}

/// Per-module name maps, one per entity kind, plus the module's `using`
/// bindings in declaration order (later bindings shadow earlier ones).
#[derive(Debug, Default, Clone)]
pub struct ModuleEntry {
    pub path_key: String,
    pub types: BTreeMap<String, String>,
    pub values: BTreeMap<String, String>,
    pub classes: BTreeMap<String, String>,
    pub usings: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    pub assembly: String,
    pub decls: BTreeMap<String, Declaration>,
    pub visibility: BTreeMap<String, Visibility>,
    pub modules: BTreeMap<String, ModuleEntry>,
    /// Module-to-module import edges within this assembly.
    pub import_graph: BTreeMap<String, BTreeSet<String>>,
    /// All parsed modules, in deterministic order.
    pub parsed: Vec<AstModule>,
}

impl SymbolTable {
    pub fn lookup(&self, key: &str) -> Option<&Declaration> {
        self.decls.get(key)
    }

    /// Resolve `name` as seen from `module_key`: module-local names first,
    /// then `using` bindings (latest wins), then builtins.
    pub fn resolve_in_module(&self, module_key: &str, name: &str) -> Option<String> {
        if let Some(entry) = self.modules.get(module_key) {
            if let Some(key) = entry
                .values
                .get(name)
                .or_else(|| entry.types.get(name))
                .or_else(|| entry.classes.get(name))
            {
                return Some(key.clone());
            }
            for (alias, target) in entry.usings.iter().rev() {
                if alias == name {
                    return Some(target.clone());
                }
            }
        }
        if self.decls.contains_key(name) {
            // Builtins are registered under their bare name.
            return Some(name.to_string());
        }
        None
    }

    /// Visibility of `target` as seen from `from_module`.
    pub fn is_accessible(&self, target: &str, from_module: &str) -> bool {
        let vis = match self.visibility.get(target) {
            Some(vis) => *vis,
            None => return true, // builtins
        };
        match vis {
            Visibility::Public => true,
            // A single assembly is compiled at a time, so Internal means
            // "declared in this build".
            Visibility::Internal => true,
            Visibility::Private => {
                let owner = target.rsplit_once("::").map(|(m, _)| m).unwrap_or(target);
                owner == from_module
            }
        }
    }
}

#[derive(Debug)]
pub struct CollectResult {
    pub sigma: SymbolTable,
    pub diags: DiagnosticStream,
}

/// Collect every module's top-level items into Σ.
pub fn collect(assembly: &str, modules: Vec<AstModule>) -> CollectResult {
    let mut sigma = SymbolTable {
        assembly: assembly.to_string(),
        ..SymbolTable::default()
    };
    let mut diags = DiagnosticStream::new();

    register_builtins(&mut sigma);

    for module in &modules {
        let mut entry = ModuleEntry {
            path_key: module.path_key.clone(),
            ..ModuleEntry::default()
        };
        for item in &module.items {
            collect_item(&mut sigma, &mut entry, &module.path_key, item, &mut diags);
        }
        sigma.modules.insert(module.path_key.clone(), entry);
        sigma
            .import_graph
            .entry(module.path_key.clone())
            .or_default();
    }

    // Imports and usings are registered after all modules exist so forward
    // references between modules work.
    for module in &modules {
        register_imports(&mut sigma, module, &mut diags);
    }

    detect_import_cycles(&sigma, &mut diags);

    sigma.parsed = modules;
    CollectResult { sigma, diags }
}

fn register(
    sigma: &mut SymbolTable,
    entry: &mut ModuleEntry,
    module_key: &str,
    name: &str,
    vis: Visibility,
    decl: Declaration,
    diags: &mut DiagnosticStream,
    span: &crate::source::Span,
) {
    let key = format!("{module_key}::{name}");
    if sigma.decls.contains_key(&key) {
        diags.emit(Diagnostic::from_code(
            "E-SEM-3001",
            Some(span.clone()),
            Some(name),
        ));
        return;
    }
    let map = match decl.kind() {
        EntityKind::Value => &mut entry.values,
        EntityKind::Type => &mut entry.types,
        EntityKind::Class => &mut entry.classes,
        EntityKind::Module => unreachable!("modules are not registered as items"),
    };
    map.insert(name.to_string(), key.clone());
    sigma.visibility.insert(key.clone(), vis);
    sigma.decls.insert(key, decl);
}

fn collect_item(
    sigma: &mut SymbolTable,
    entry: &mut ModuleEntry,
    module_key: &str,
    item: &Item,
    diags: &mut DiagnosticStream,
) {
    match item {
        Item::Procedure(p) => register(
            sigma,
            entry,
            module_key,
            &p.name,
            p.vis,
            Declaration::Procedure(Rc::new(p.clone())),
            diags,
            &p.span,
        ),
        Item::Record(r) => register(
            sigma,
            entry,
            module_key,
            &r.name,
            r.vis,
            Declaration::Record(Rc::new(r.clone())),
            diags,
            &r.span,
        ),
        Item::Enum(e) => register(
            sigma,
            entry,
            module_key,
            &e.name,
            e.vis,
            Declaration::Enum(Rc::new(e.clone())),
            diags,
            &e.span,
        ),
        Item::Modal(m) => register(
            sigma,
            entry,
            module_key,
            &m.name,
            m.vis,
            Declaration::Modal(Rc::new(m.clone())),
            diags,
            &m.span,
        ),
        Item::Class(c) => register(
            sigma,
            entry,
            module_key,
            &c.name,
            c.vis,
            Declaration::Class(Rc::new(c.clone())),
            diags,
            &c.span,
        ),
        Item::TypeAlias(t) => register(
            sigma,
            entry,
            module_key,
            &t.name,
            t.vis,
            Declaration::TypeAlias(Rc::new(t.clone())),
            diags,
            &t.span,
        ),
        Item::Static(s) => register(
            sigma,
            entry,
            module_key,
            &s.name,
            s.vis,
            Declaration::Static(Rc::new(s.clone())),
            diags,
            &s.span,
        ),
        Item::Extern(block) => {
            for proc in &block.procs {
                register(
                    sigma,
                    entry,
                    module_key,
                    &proc.name,
                    Visibility::Internal,
                    Declaration::ExternProc {
                        abi: block.abi.clone(),
                        decl: Rc::new(proc.clone()),
                    },
                    diags,
                    &proc.span,
                );
            }
        }
        Item::Import(_) | Item::Using(_) | Item::Error(_) => {}
    }
}

fn register_imports(sigma: &mut SymbolTable, module: &AstModule, diags: &mut DiagnosticStream) {
    for item in &module.items {
        match item {
            Item::Import(import) => {
                let assembly = match import.path.first() {
                    Some(first) => first.clone(),
                    None => continue,
                };
                if assembly != sigma.assembly {
                    diags.emit(Diagnostic::from_code(
                        "E-SEM-3002",
                        Some(import.span.clone()),
                        Some(&assembly),
                    ));
                    continue;
                }
                let target_module = import.path.join("::");
                if !sigma.modules.contains_key(&target_module) {
                    diags.emit(Diagnostic::from_code(
                        "E-SEM-3004",
                        Some(import.span.clone()),
                        Some(&target_module),
                    ));
                    continue;
                }
                sigma
                    .import_graph
                    .entry(module.path_key.clone())
                    .or_default()
                    .insert(target_module.clone());

                let names: Vec<(String, String)> = if import.items.is_empty() {
                    // Whole-module import: bind every exported name, or the
                    // alias to the module itself when given.
                    match &import.alias {
                        Some(alias) => vec![(alias.clone(), target_module.clone())],
                        None => {
                            let target = sigma.modules.get(&target_module).cloned();
                            target
                                .map(|t| {
                                    t.types
                                        .iter()
                                        .chain(t.values.iter())
                                        .chain(t.classes.iter())
                                        .map(|(n, k)| (n.clone(), k.clone()))
                                        .collect()
                                })
                                .unwrap_or_default()
                        }
                    }
                } else {
                    let mut out = Vec::new();
                    for name in &import.items {
                        let key = format!("{target_module}::{name}");
                        if !sigma.decls.contains_key(&key) {
                            diags.emit(Diagnostic::from_code(
                                "E-SEM-3003",
                                Some(import.span.clone()),
                                Some(&key),
                            ));
                            continue;
                        }
                        out.push((name.clone(), key));
                    }
                    out
                };

                let names: Vec<(String, String, bool)> = names
                    .into_iter()
                    .map(|(n, k)| {
                        let visible = sigma_vis(sigma, &k);
                        (n, k, visible)
                    })
                    .collect();
                let entry = sigma.modules.get_mut(&module.path_key).expect("module");
                for (name, key, visible) in names {
                    shadow_check(entry, &name, diags, &import.span, visible);
                    entry.usings.push((name, key));
                }
            }
            Item::Using(using) => register_using(sigma, module, using, diags),
            _ => {}
        }
    }
}

fn sigma_vis(sigma: &SymbolTable, key: &str) -> bool {
    sigma.visibility.get(key).copied() != Some(Visibility::Private)
}

fn shadow_check(
    entry: &mut ModuleEntry,
    name: &str,
    diags: &mut DiagnosticStream,
    span: &crate::source::Span,
    shadowed_visible: bool,
) {
    let shadows = entry.usings.iter().any(|(n, _)| n == name);
    // Shadowing warns only when the shadowed entity would otherwise have
    // been visible from this module.
    if shadows && shadowed_visible {
        diags.emit(Diagnostic::from_code(
            "W-SEM-3006",
            Some(span.clone()),
            Some(name),
        ));
    }
}

fn register_using(
    sigma: &mut SymbolTable,
    module: &AstModule,
    using: &UsingDecl,
    diags: &mut DiagnosticStream,
) {
    let key = using.path.join("::");
    let resolved = if sigma.decls.contains_key(&key) {
        Some(key.clone())
    } else {
        // A bare name may refer through the current module.
        sigma.resolve_in_module(&module.path_key, &key)
    };
    let Some(target) = resolved else {
        diags.emit(Diagnostic::from_code(
            "E-SEM-3004",
            Some(using.span.clone()),
            Some(&key),
        ));
        return;
    };
    if let Some((owner, _)) = target.rsplit_once("::") {
        if sigma.modules.contains_key(owner) && owner != module.path_key {
            sigma
                .import_graph
                .entry(module.path_key.clone())
                .or_default()
                .insert(owner.to_string());
        }
    }
    let name = using
        .alias
        .clone()
        .unwrap_or_else(|| using.path.last().cloned().unwrap_or_default());
    let visible = sigma_vis(sigma, &target);
    let entry = sigma.modules.get_mut(&module.path_key).expect("module");
    shadow_check(entry, &name, diags, &using.span, visible);
    entry.usings.push((name, target));
}

/// DFS over the import graph; a back edge is a cycle.
fn detect_import_cycles(sigma: &SymbolTable, diags: &mut DiagnosticStream) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }
    let mut marks: BTreeMap<&str, Mark> = sigma
        .import_graph
        .keys()
        .map(|k| (k.as_str(), Mark::White))
        .collect();

    fn visit<'a>(
        node: &'a str,
        graph: &'a BTreeMap<String, BTreeSet<String>>,
        marks: &mut BTreeMap<&'a str, Mark>,
        diags: &mut DiagnosticStream,
    ) {
        marks.insert(node, Mark::Grey);
        if let Some(edges) = graph.get(node) {
            for next in edges {
                match marks.get(next.as_str()).copied() {
                    Some(Mark::White) => visit(next, graph, marks, diags),
                    Some(Mark::Grey) => {
                        diags.emit(Diagnostic::from_code(
                            "E-SEM-3005",
                            None,
                            Some(&format!("{node} -> {next}")),
                        ));
                    }
                    _ => {}
                }
            }
        }
        marks.insert(node, Mark::Black);
    }

    let keys: Vec<&str> = sigma.import_graph.keys().map(|k| k.as_str()).collect();
    for key in keys {
        if marks.get(key).copied() == Some(Mark::White) {
            visit(key, &sigma.import_graph, &mut marks, diags);
        }
    }
}

/// Ambient declarations every assembly sees: capability classes, the
/// `Bitcopy` marker class, the `Context` record, and the async aliases'
/// carrier names. Registered under bare keys.
fn register_builtins(sigma: &mut SymbolTable) {
    use crate::source::Span;
    use crate::syntax::ast::{FieldDecl, TypeExpr, TypeNode};

    let builtin_classes = [
        "Bitcopy",
        "$FileSystem",
        "$HeapAllocator",
        "$ExecutionDomain",
    ];
    for name in builtin_classes {
        sigma.decls.insert(
            name.to_string(),
            Declaration::Class(Rc::new(ClassDecl {
                vis: Visibility::Public,
                name: name.to_string(),
                methods: Vec::new(),
                span: Span::default(),
            })),
        );
    }

    let dyn_field = |name: &str, class: &str| FieldDecl {
        vis: Visibility::Public,
        boundary: false,
        name: name.to_string(),
        ty: Rc::new(TypeExpr {
            node: TypeNode::Dynamic {
                path: vec![class.to_string()],
            },
            span: Span::default(),
        }),
        span: Span::default(),
    };

    sigma.decls.insert(
        "Context".to_string(),
        Declaration::Record(Rc::new(RecordDecl {
            vis: Visibility::Public,
            name: "Context".to_string(),
            implements: vec![vec!["Bitcopy".to_string()]],
            fields: vec![
                dyn_field("fs", "$FileSystem"),
                dyn_field("heap", "$HeapAllocator"),
                dyn_field("sys", "$ExecutionDomain"),
            ],
            methods: Vec::new(),
            span: Span::default(),
        })),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::load_source;
    use crate::syntax::parser::parse_module;

    fn module(key: &str, text: &str) -> AstModule {
        let loaded = load_source("t.cursive", text.as_bytes());
        parse_module(&loaded.source.unwrap(), key).module
    }

    #[test]
    fn duplicate_top_level_name_is_rejected() {
        let m = module("app", "procedure f() -> i32 { 0 }\nprocedure f() -> i32 { 1 }\n");
        let result = collect("app", vec![m]);
        assert!(result.diags.has_code("E-SEM-3001"));
    }

    #[test]
    fn import_cycle_is_detected() {
        let a = module("app::a", "import app::b\n");
        let b = module("app::b", "import app::a\n");
        let result = collect("app", vec![a, b]);
        assert!(result.diags.has_code("E-SEM-3005"));
    }

    #[test]
    fn builtin_context_is_preregistered() {
        let result = collect("app", vec![]);
        assert!(matches!(
            result.sigma.lookup("Context"),
            Some(Declaration::Record(_))
        ));
        assert!(result.sigma.lookup("$FileSystem").is_some());
    }
}
