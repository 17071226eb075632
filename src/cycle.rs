//! Detection of classes that would have to contain themselves.
//!
//! A class-typed field without an initializer is stored inline, so an edge
//! `A -> B` in this graph means "every `A` physically contains a `B`". Any
//! cycle therefore describes an infinitely large layout. A field initialized
//! to `null` is a one-word reference and contributes no edge.

use indexmap::{IndexMap, IndexSet};
use tracing::trace;

use crate::ast::{ClassId, Program};
use crate::error::{CompileResult, CycleSnafu};

/// Inline-containment graph between classes.
#[derive(Debug, Default, Clone)]
pub struct ClassGraph {
  /// Outgoing edges: class -> classes it embeds inline.
  embeds: IndexMap<ClassId, IndexSet<ClassId>>,
}

impl ClassGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build the graph for every class of a program with resolved field types.
  pub fn from_program(program: &Program) -> Self {
    let mut graph = Self::new();
    for (index, class) in program.classes.values().enumerate() {
      let id = ClassId(index);
      graph.add_class(id);
      for &field in class.fields.values() {
        let decl = program.var(field);
        if let Some(target) = decl.class
          && decl.embeds_instance()
        {
          graph.add_dependency(id, target);
        }
      }
    }
    graph
  }

  pub fn add_class(&mut self, class: ClassId) {
    self.embeds.entry(class).or_default();
  }

  /// Record that `from` embeds an instance of `to`.
  pub fn add_dependency(&mut self, from: ClassId, to: ClassId) {
    self.add_class(to);
    self.embeds.entry(from).or_default().insert(to);
  }

  /// Returns the first cycle found, starting and ending with the same class,
  /// or `None` if the graph is acyclic.
  pub fn find_cycle(&self) -> Option<Vec<ClassId>> {
    let mut visited = IndexSet::new();
    let mut on_stack = IndexSet::new();
    let mut path = Vec::new();

    for &class in self.embeds.keys() {
      if let Some(cycle) = self.dfs(class, &mut visited, &mut on_stack, &mut path) {
        return Some(cycle);
      }
    }
    None
  }

  fn dfs(
    &self,
    class: ClassId,
    visited: &mut IndexSet<ClassId>,
    on_stack: &mut IndexSet<ClassId>,
    path: &mut Vec<ClassId>,
  ) -> Option<Vec<ClassId>> {
    if on_stack.contains(&class) {
      let start = path.iter().position(|&c| c == class).unwrap_or(0);
      let mut cycle = path[start..].to_vec();
      cycle.push(class);
      return Some(cycle);
    }

    if !visited.insert(class) {
      return None;
    }

    on_stack.insert(class);
    path.push(class);

    if let Some(targets) = self.embeds.get(&class) {
      for &target in targets {
        if let Some(cycle) = self.dfs(target, visited, on_stack, path) {
          return Some(cycle);
        }
      }
    }

    path.pop();
    on_stack.shift_remove(&class);
    None
  }
}

/// Reject programs whose inline class fields form a cycle.
pub fn check_cycles(program: &Program) -> CompileResult<()> {
  let graph = ClassGraph::from_program(program);
  let Some(cycle) = graph.find_cycle() else {
    trace!(classes = program.classes.len(), "class layout is acyclic");
    return Ok(());
  };

  let path = cycle
    .iter()
    .map(|&class| program.class(class).name.as_str())
    .collect::<Vec<_>>()
    .join(" -> ");
  CycleSnafu {
    class: program.class(cycle[0]).name.as_str(),
    path,
  }
  .fail()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CompileError;
  use crate::resolve::resolve;
  use crate::{parser, tokenizer};

  fn resolve_source(source: &str) -> CompileResult<Program> {
    let tokens = tokenizer::tokenize(source)?;
    let mut program = parser::parse(tokens, source)?;
    resolve(&mut program, source)?;
    Ok(program)
  }

  #[test]
  fn finds_two_class_cycle() {
    let mut graph = ClassGraph::new();
    graph.add_dependency(ClassId(0), ClassId(1));
    graph.add_dependency(ClassId(1), ClassId(0));
    assert_eq!(
      graph.find_cycle(),
      Some(vec![ClassId(0), ClassId(1), ClassId(0)])
    );
  }

  #[test]
  fn diamond_is_not_a_cycle() {
    let mut graph = ClassGraph::new();
    graph.add_dependency(ClassId(0), ClassId(1));
    graph.add_dependency(ClassId(0), ClassId(2));
    graph.add_dependency(ClassId(1), ClassId(3));
    graph.add_dependency(ClassId(2), ClassId(3));
    assert_eq!(graph.find_cycle(), None);
  }

  #[test]
  fn rejects_mutually_embedded_classes() {
    let err = resolve_source("class A { B b; } class B { A a; } int main() { return 0; }")
      .unwrap_err();
    let CompileError::Cycle { class, path } = &err else {
      panic!("expected a cycle error, got {err}");
    };
    assert_eq!(class, "A");
    assert_eq!(path, "A -> B -> A");
    assert!(err.to_string().contains("null"));
  }

  #[test]
  fn null_initializer_breaks_the_cycle() {
    resolve_source("class A { B b; } class B { A a = null; } int main() { return 0; }")
      .expect("null reference breaks the cycle");
  }

  #[test]
  fn rejects_self_embedding() {
    let err = resolve_source("class Node { int v; Node next; } int main() { return 0; }")
      .unwrap_err();
    assert!(matches!(err, CompileError::Cycle { .. }));
  }

  #[test]
  fn self_reference_through_null_is_allowed() {
    resolve_source("class Node { int v; Node next = null; } int main() { return 0; }")
      .expect("linked node");
  }

  #[test]
  fn longer_chain_reports_whole_path() {
    let source = "class A { B b; } class B { C c; } class C { A a; } int main() { return 0; }";
    let err = resolve_source(source).unwrap_err();
    assert!(err.to_string().contains("A -> B -> C -> A"));
  }
}
