/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A generic iterative bit-vector data-flow engine, driven by the structure
//! tree.  Regions are analysed bottom-up from the root: each region runs a
//! worklist over its direct children, recursing into child regions, until no
//! child changes.  A region whose external inputs are the same as last time
//! is not re-analysed.

use log::{debug, trace};
use std::collections::BTreeMap;

use crate::analysis::CfgInfo;
use crate::bit_set::BitSet;
use crate::data_structures::{BlockIx, Queue, StructIx, TypedIxVec};
use crate::interface::ShrinkWrapError;
use crate::structure::{StructList, StructureKind, StructureTree};

/// The interrupt predicate is polled once every this many worklist pops.
pub const INTERRUPT_POLL_INTERVAL: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
  Forward,
  Backward,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Meet {
  Intersection,
  Union,
}

/// The four working sets of a block.  The exception pair applies on the
/// block's exception edges.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenKill {
  pub regular_gen: BitSet,
  pub regular_kill: BitSet,
  pub exception_gen: BitSet,
  pub exception_kill: BitSet,
}

/// A concrete analysis: what the engine needs to know to solve it.
pub trait DataFlowProblem {
  fn name(&self) -> &'static str;

  fn direction(&self) -> Direction;

  fn meet(&self) -> Meet;

  /// Width of the bit vectors.
  fn num_bits(&self) -> u32;

  /// The value flowing in at END (backward) or START (forward).
  fn boundary_value(&self) -> BitSet;

  fn compute_gen_kill(&self, bix: BlockIx) -> GenKill;

  fn supports_gen_kill_caching(&self, _bix: BlockIx) -> bool {
    true
  }
}

/// Per-block IN and OUT values, START and END included.
#[derive(Clone, Debug)]
pub struct DataFlowSolution {
  pub in_sets: TypedIxVec<BlockIx, BitSet>,
  pub out_sets: TypedIxVec<BlockIx, BitSet>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EngineStats {
  pub block_visits: u32,
  pub gen_kill_computations: u32,
  pub region_visits: u32,
  pub region_skips: u32,
}

#[derive(Clone, Debug, Default)]
struct RegionInfo {
  has_been_analyzed_before: bool,
  // Every value read from outside the region, keyed by block and by whether
  // it is the block's meet value (true) or its solution (false).
  last_inputs: BTreeMap<(BlockIx, bool), BitSet>,
}

pub struct DataFlowEngine<'a, P: DataFlowProblem> {
  problem: &'a P,
  cfg: &'a CfgInfo,
  tree: &'a StructureTree,
  interrupt: Option<&'a dyn Fn() -> bool>,

  // OUT (backward) or IN (forward): the meet over the neighbours.
  meet_values: TypedIxVec<BlockIx, BitSet>,
  // IN (backward) or OUT (forward): the block's own result.
  solutions: TypedIxVec<BlockIx, BitSet>,
  gen_kill: TypedIxVec<BlockIx, Option<GenKill>>,
  region_info: TypedIxVec<StructIx, RegionInfo>,
  gen_kill_ok: TypedIxVec<StructIx, bool>,

  iterations: u32,
  pub stats: EngineStats,
}

impl<'a, P: DataFlowProblem> DataFlowEngine<'a, P> {
  pub fn new(
    problem: &'a P, cfg: &'a CfgInfo, tree: &'a StructureTree,
    interrupt: Option<&'a dyn Fn() -> bool>,
  ) -> Self {
    let num_blocks = cfg.num_blocks();
    let top = Self::top_of(problem);

    let mut meet_values = TypedIxVec::new();
    meet_values.resize(num_blocks, top.clone());
    let mut solutions = TypedIxVec::new();
    solutions.resize(num_blocks, top);
    let mut gen_kill = TypedIxVec::new();
    gen_kill.resize(num_blocks, None);
    let mut region_info = TypedIxVec::new();
    region_info.resize(tree.nodes.len(), RegionInfo::default());

    let gen_kill_ok = Self::compute_gen_kill_eligibility(cfg, tree);

    Self {
      problem,
      cfg,
      tree,
      interrupt,
      meet_values,
      solutions,
      gen_kill,
      region_info,
      gen_kill_ok,
      iterations: 0,
      stats: EngineStats::default(),
    }
  }

  fn top_of(problem: &P) -> BitSet {
    match problem.meet() {
      Meet::Intersection => BitSet::full(problem.num_bits()),
      Meet::Union => BitSet::empty(),
    }
  }

  fn meet_into(&self, acc: &mut BitSet, value: &BitSet) {
    match self.problem.meet() {
      Meet::Intersection => acc.intersect(value),
      Meet::Union => acc.union(value),
    }
  }

  /// Solve the problem over the whole function.
  pub fn perform(&mut self) -> Result<DataFlowSolution, ShrinkWrapError> {
    debug!(
      "DataFlowEngine::perform: begin {} over {} blocks",
      self.problem.name(),
      self.cfg.num_blocks()
    );
    let root = self.tree.root;
    self.analyze_region_structure(root, false)?;
    debug!(
      "DataFlowEngine::perform: end {}: {} pops, {:?}",
      self.problem.name(),
      self.iterations,
      self.stats
    );
    Ok(self.solution())
  }

  pub fn solution(&self) -> DataFlowSolution {
    match self.problem.direction() {
      Direction::Backward => DataFlowSolution {
        in_sets: self.solutions.clone(),
        out_sets: self.meet_values.clone(),
      },
      Direction::Forward => DataFlowSolution {
        in_sets: self.meet_values.clone(),
        out_sets: self.solutions.clone(),
      },
    }
  }

  pub fn iterations(&self) -> u32 {
    self.iterations
  }

  // ---------------------------------------------------------------------
  // Gen/kill caching

  // A structure may summarise with cached gen/kill sets unless it is, or
  // holds, an improper region, or it is a natural loop whose latches do
  // anything other than branch back to the header or leave the loop.
  fn structure_permits_gen_kill(
    cfg: &CfgInfo, tree: &StructureTree, six: StructIx,
  ) -> bool {
    let node = tree.node(six);
    match node.kind {
      StructureKind::Block | StructureKind::Acyclic => true,
      StructureKind::Improper => false,
      StructureKind::NaturalLoop => {
        let header = node.entry;
        let latches: Vec<BlockIx> =
          cfg.flow_preds(header).filter(|p| node.contains(*p)).collect();
        let exit_targets: Vec<BlockIx> =
          node.exit_edges.iter().map(|(_, to)| *to).collect();
        for latch in latches.iter() {
          let mut has_exit = false;
          for s in cfg.flow_succs(*latch) {
            if exit_targets.contains(&s) {
              has_exit = true;
            } else if s != header {
              return false;
            }
          }
          if !has_exit {
            return false;
          }
        }
        for target in exit_targets.iter() {
          let in_loop_preds: Vec<BlockIx> =
            cfg.flow_preds(*target).filter(|p| node.contains(*p)).collect();
          let num_latches =
            in_loop_preds.iter().filter(|p| latches.contains(p)).count();
          if num_latches > 0 && num_latches < in_loop_preds.len() {
            return false;
          }
        }
        true
      }
    }
  }

  fn compute_gen_kill_eligibility(
    cfg: &CfgInfo, tree: &StructureTree,
  ) -> TypedIxVec<StructIx, bool> {
    let num_nodes = tree.nodes.len();
    let mut ok = TypedIxVec::<StructIx, bool>::new();
    ok.resize(num_nodes, true);
    for six in StructIx::new(0).dotdot(StructIx::new(num_nodes)) {
      if tree.node(six).is_block() {
        continue;
      }
      if !Self::structure_permits_gen_kill(cfg, tree, six) {
        let mut cur = Some(six);
        while let Some(s) = cur {
          ok[s] = false;
          cur = tree.node(s).parent;
        }
      }
    }
    // Leaves follow their enclosing region.
    for six in StructIx::new(0).dotdot(StructIx::new(num_nodes)) {
      if tree.node(six).is_block() {
        if let Some(parent) = tree.node(six).parent {
          ok[six] = ok[parent];
        }
      }
    }
    ok
  }

  pub fn can_gen_and_kill_for_structure(&self, six: StructIx) -> bool {
    self.gen_kill_ok[six]
  }

  fn gen_kill_for(&mut self, bix: BlockIx) -> GenKill {
    if let Some(gk) = &self.gen_kill[bix] {
      return gk.clone();
    }
    self.stats.gen_kill_computations += 1;
    let gk = self.problem.compute_gen_kill(bix);
    let leaf = self.tree.leaf(bix);
    if self.problem.supports_gen_kill_caching(bix) && self.gen_kill_ok[leaf] {
      self.gen_kill[bix] = Some(gk.clone());
    }
    gk
  }

  // ---------------------------------------------------------------------
  // Blocks

  /// Recompute one block's values from its neighbours.  Returns whether its
  /// solution changed, or false when `check_for_change` is not set.
  pub fn analyze_block_structure(
    &mut self, bix: BlockIx, check_for_change: bool,
  ) -> bool {
    self.stats.block_visits += 1;
    let gk = self.gen_kill_for(bix);
    let top = Self::top_of(self.problem);
    let cfg = self.cfg;

    let (meet_value, solution) = match self.problem.direction() {
      Direction::Backward => {
        let meet_value = if bix == cfg.end {
          self.problem.boundary_value()
        } else {
          let mut acc = top.clone();
          for s in cfg.succ_map[bix].iter() {
            let v = self.solutions[*s].clone();
            self.meet_into(&mut acc, &v);
          }
          acc
        };
        let mut solution = meet_value.clone();
        solution.remove(&gk.regular_kill);
        solution.union(&gk.regular_gen);
        if !cfg.exc_succ_map[bix].is_empty() {
          let mut exc = top.clone();
          for h in cfg.exc_succ_map[bix].iter() {
            let v = self.solutions[*h].clone();
            self.meet_into(&mut exc, &v);
          }
          exc.remove(&gk.exception_kill);
          exc.union(&gk.exception_gen);
          self.meet_into(&mut solution, &exc);
        }
        (meet_value, solution)
      }
      Direction::Forward => {
        let meet_value = if bix == cfg.start {
          self.problem.boundary_value()
        } else {
          let mut acc = top.clone();
          for p in cfg.pred_map[bix].iter() {
            let v = self.solutions[*p].clone();
            self.meet_into(&mut acc, &v);
          }
          for p in cfg.exc_pred_map[bix].iter() {
            let pgk = self.gen_kill_for(*p);
            let mut v = self.meet_values[*p].clone();
            v.remove(&pgk.exception_kill);
            v.union(&pgk.exception_gen);
            self.meet_into(&mut acc, &v);
          }
          acc
        };
        let mut solution = meet_value.clone();
        solution.remove(&gk.regular_kill);
        solution.union(&gk.regular_gen);
        (meet_value, solution)
      }
    };

    let changed = solution != self.solutions[bix];
    trace!(
      "  {:?} meet {:?} solution {:?}{}",
      bix,
      meet_value,
      solution,
      if changed { " (changed)" } else { "" }
    );
    self.meet_values[bix] = meet_value;
    self.solutions[bix] = solution;
    check_for_change && changed
  }

  // ---------------------------------------------------------------------
  // Regions

  fn region_inputs(&self, region: StructIx) -> BTreeMap<(BlockIx, bool), BitSet> {
    let node = self.tree.node(region);
    let mut inputs = BTreeMap::new();
    match self.problem.direction() {
      Direction::Backward => {
        for (_, to) in node.exit_edges.iter() {
          inputs.insert((*to, false), self.solutions[*to].clone());
        }
      }
      Direction::Forward => {
        for (from, to) in node.entry_edges.iter() {
          inputs.insert((*from, false), self.solutions[*from].clone());
          if self.cfg.exc_pred_map[*to].contains(from) {
            inputs.insert((*from, true), self.meet_values[*from].clone());
          }
        }
      }
    }
    inputs
  }

  // The values a region exposes to the rest of the graph.
  fn region_outputs(&self, region: StructIx) -> Vec<BitSet> {
    let node = self.tree.node(region);
    if region == self.tree.root {
      let b = match self.problem.direction() {
        Direction::Backward => self.cfg.start,
        Direction::Forward => self.cfg.end,
      };
      return vec![self.solutions[b].clone()];
    }
    let mut boundary: Vec<BlockIx> = match self.problem.direction() {
      Direction::Backward => node.entry_edges.iter().map(|(_, to)| *to).collect(),
      Direction::Forward => node.exit_edges.iter().map(|(from, _)| *from).collect(),
    };
    boundary.sort();
    boundary.dedup();
    boundary.iter().map(|b| self.solutions[*b].clone()).collect()
  }

  /// Bring a region to its fixed point given the current values around it.
  /// Returns whether the values it exposes changed, or false when
  /// `check_for_change` is not set.
  pub fn analyze_region_structure(
    &mut self, region: StructIx, check_for_change: bool,
  ) -> Result<bool, ShrinkWrapError> {
    let inputs = self.region_inputs(region);
    if self.region_info[region].has_been_analyzed_before
      && self.region_info[region].last_inputs == inputs
    {
      trace!("region {:?}: inputs unchanged, skipping", region);
      self.stats.region_skips += 1;
      return Ok(false);
    }
    self.stats.region_visits += 1;
    trace!("region {:?}: begin", region);

    let before = self.region_outputs(region);
    let mut all_pending = !self.region_info[region].has_been_analyzed_before;
    while self.run_worklist_pass(region, all_pending)? {
      all_pending = false;
    }

    let info = &mut self.region_info[region];
    info.has_been_analyzed_before = true;
    info.last_inputs = inputs;
    trace!("region {:?}: end", region);

    if !check_for_change {
      return Ok(false);
    }
    Ok(self.region_outputs(region) != before)
  }

  // One worklist pass over the direct children of |region|.  Returns whether
  // any child changed.
  fn run_worklist_pass(
    &mut self, region: StructIx, all_pending: bool,
  ) -> Result<bool, ShrinkWrapError> {
    let tree = self.tree;
    let node = tree.node(region);
    let backward = self.problem.direction() == Direction::Backward;
    let deps = move |c: StructIx| -> &'a StructList {
      if backward {
        &tree.node(c).succs
      } else {
        &tree.node(c).preds
      }
    };
    let dependents = move |c: StructIx| -> &'a StructList {
      if backward {
        &tree.node(c).preds
      } else {
        &tree.node(c).succs
      }
    };

    let mut seeds = Vec::<StructIx>::new();
    for c in node.children.iter().cloned() {
      let child = tree.node(c);
      let external = if backward {
        child.exit_edges.iter().any(|(_, to)| !node.contains(*to))
      } else {
        child.entry_edges.iter().any(|(from, _)| !node.contains(*from))
      };
      if external {
        seeds.push(c);
      }
    }
    for c in node.children.iter().cloned() {
      if deps(c).is_empty() && !seeds.contains(&c) {
        seeds.push(c);
      }
    }
    if seeds.is_empty() {
      seeds = node.children.clone();
    }

    let mut pending = BitSet::empty();
    if all_pending {
      for c in node.children.iter() {
        pending.insert(c.get());
      }
    } else {
      for c in seeds.iter() {
        pending.insert(c.get());
      }
    }
    let mut nodes_in_cycle = BitSet::empty();
    let mut analyzed = BitSet::empty();
    let mut queue: Queue<StructIx> = seeds.iter().cloned().collect();
    let mut changed_any = false;

    loop {
      while let Some(c) = queue.pop_front() {
        self.iterations += 1;
        if self.iterations % INTERRUPT_POLL_INTERVAL == 0 {
          if let Some(interrupted) = self.interrupt {
            if interrupted() {
              debug!("{}: interrupted", self.problem.name());
              return Err(ShrinkWrapError::Interrupted);
            }
          }
        }
        if !pending.contains(c.get()) {
          continue;
        }
        nodes_in_cycle.insert(c.get());

        // Do whatever this child depends on first, unless that dependency is
        // already on the path that led here; then we are on a cycle.
        let blocker = deps(c).iter().cloned().find(|d| {
          pending.contains(d.get()) && !nodes_in_cycle.contains(d.get())
        });
        if let Some(d) = blocker {
          trace!("  defer {:?} behind {:?}", c, d);
          queue.push_front(c);
          queue.push_front(d);
          continue;
        }

        let changed = if tree.node(c).is_block() {
          let bix = tree.node(c).entry;
          self.analyze_block_structure(bix, true)
        } else {
          self.analyze_region_structure(c, true)?
        };
        analyzed.insert(c.get());
        nodes_in_cycle.delete(c.get());
        pending.delete(c.get());

        if changed {
          changed_any = true;
          for p in dependents(c).iter() {
            pending.insert(p.get());
            queue.push_back(*p);
          }
        } else if all_pending {
          for p in dependents(c).iter() {
            if pending.contains(p.get()) {
              queue.push_back(*p);
            }
          }
        }
      }

      // Children that cannot reach the seeds, such as an infinite loop, are
      // never pulled in by the propagation above.
      if all_pending {
        if let Some(c) =
          node.children.iter().find(|c| !analyzed.contains(c.get()))
        {
          queue.push_back(*c);
          continue;
        }
      }
      break;
    }

    if let Some(c) = node.children.iter().find(|c| pending.contains(c.get())) {
      return Err(ShrinkWrapError::InvariantViolation(format!(
        "{}: {:?} still pending after worklist drained",
        self.problem.name(),
        c
      )));
    }
    Ok(changed_any)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::test_utils::cfg_func;

  // Gen sets given per block; kills empty.
  struct TableProblem {
    direction: Direction,
    meet: Meet,
    num_bits: u32,
    gens: Vec<BitSet>,
    caching: bool,
  }

  impl DataFlowProblem for TableProblem {
    fn name(&self) -> &'static str {
      "table"
    }
    fn direction(&self) -> Direction {
      self.direction
    }
    fn meet(&self) -> Meet {
      self.meet
    }
    fn num_bits(&self) -> u32 {
      self.num_bits
    }
    fn boundary_value(&self) -> BitSet {
      BitSet::empty()
    }
    fn compute_gen_kill(&self, bix: BlockIx) -> GenKill {
      let gen = self.gens.get(bix.get_usize()).cloned().unwrap_or_default();
      GenKill {
        regular_gen: gen.clone(),
        regular_kill: BitSet::empty(),
        exception_gen: gen,
        exception_kill: BitSet::empty(),
      }
    }
    fn supports_gen_kill_caching(&self, _bix: BlockIx) -> bool {
      self.caching
    }
  }

  fn problem(
    direction: Direction, meet: Meet, gens: Vec<Vec<u32>>, caching: bool,
  ) -> TableProblem {
    TableProblem {
      direction,
      meet,
      num_bits: 8,
      gens: gens.into_iter().map(BitSet::from_vec).collect(),
      caching,
    }
  }

  #[test]
  fn backward_intersection_on_diamond() {
    // 0 -> {1, 2} -> 3 -> exit; bit 1 used in 1 only, bit 2 in both arms.
    let func = cfg_func(&[&[1, 2], &[3], &[3], &[]], &[3]);
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let p = problem(
      Direction::Backward,
      Meet::Intersection,
      vec![vec![], vec![1, 2], vec![2], vec![]],
      true,
    );
    let mut engine = DataFlowEngine::new(&p, &cfg, &tree, None);
    let sol = engine.perform().unwrap();
    let b = BlockIx::new;
    assert_eq!(sol.in_sets[b(1)].to_vec(), vec![1, 2]);
    assert_eq!(sol.in_sets[b(2)].to_vec(), vec![2]);
    assert_eq!(sol.in_sets[b(0)].to_vec(), vec![2]);
    assert_eq!(sol.out_sets[b(0)].to_vec(), vec![2]);
    assert!(sol.in_sets[b(3)].is_empty());
    assert!(sol.in_sets[cfg.end].is_empty());
    assert_eq!(sol.in_sets[cfg.start].to_vec(), vec![2]);
  }

  #[test]
  fn forward_union_through_loop() {
    // 0 -> 1 -> 2 -> {1, 3}; bit 5 generated in 2 reaches 1 via the back edge.
    let func = cfg_func(&[&[1], &[2], &[1, 3], &[]], &[3]);
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let p = problem(
      Direction::Forward,
      Meet::Union,
      vec![vec![0], vec![], vec![5], vec![]],
      true,
    );
    let mut engine = DataFlowEngine::new(&p, &cfg, &tree, None);
    let sol = engine.perform().unwrap();
    let b = BlockIx::new;
    assert_eq!(sol.in_sets[b(1)].to_vec(), vec![0, 5]);
    assert_eq!(sol.out_sets[b(2)].to_vec(), vec![0, 5]);
    assert_eq!(sol.in_sets[b(3)].to_vec(), vec![0, 5]);
    assert_eq!(sol.in_sets[cfg.end].to_vec(), vec![0, 5]);
  }

  #[test]
  fn converged_blocks_do_not_change() {
    // Two nested loops and a diamond inside.
    let func = cfg_func(
      &[&[1], &[2, 3], &[4], &[4], &[1, 5], &[5, 6], &[]],
      &[6],
    );
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let p = problem(
      Direction::Backward,
      Meet::Intersection,
      vec![vec![3], vec![1], vec![2], vec![2, 4], vec![], vec![1, 4], vec![]],
      true,
    );
    let mut engine = DataFlowEngine::new(&p, &cfg, &tree, None);
    let sol = engine.perform().unwrap();
    for b in cfg.all_blocks() {
      assert!(!engine.analyze_block_structure(b, true), "{:?} moved", b);
    }
    // Every IN is the transfer of the meet of the successors' INs.
    for b in cfg.all_blocks() {
      if b == cfg.end {
        continue;
      }
      let mut expect = BitSet::full(8);
      for s in cfg.succ_map[b].iter() {
        expect.intersect(&sol.in_sets[*s]);
      }
      expect.union(&p.compute_gen_kill(b).regular_gen);
      assert_eq!(sol.in_sets[b], expect, "{:?}", b);
    }
  }

  #[test]
  fn caching_does_not_change_results() {
    // 1 is a while-loop header whose latch 2 does not exit, so the loop
    // cannot be summarised.
    let func = cfg_func(&[&[1], &[2, 3], &[1], &[]], &[3]);
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let gens = vec![vec![], vec![1], vec![2], vec![3]];

    let cached =
      problem(Direction::Backward, Meet::Intersection, gens.clone(), true);
    let mut e1 = DataFlowEngine::new(&cached, &cfg, &tree, None);
    let s1 = e1.perform().unwrap();

    let uncached = problem(Direction::Backward, Meet::Intersection, gens, false);
    let mut e2 = DataFlowEngine::new(&uncached, &cfg, &tree, None);
    let s2 = e2.perform().unwrap();

    assert_eq!(s1.in_sets, s2.in_sets);
    assert_eq!(s1.out_sets, s2.out_sets);
    let lp = tree.containing_loop(BlockIx::new(1)).unwrap();
    assert!(!e1.can_gen_and_kill_for_structure(lp));
    assert!(!e1.can_gen_and_kill_for_structure(tree.root));
    assert!(e2.stats.gen_kill_computations >= e2.stats.block_visits);
  }

  #[test]
  fn acyclic_graph_caches_gen_kill() {
    let func = cfg_func(&[&[1, 2], &[3], &[3], &[]], &[3]);
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let p = problem(
      Direction::Backward,
      Meet::Intersection,
      vec![vec![], vec![1], vec![1], vec![]],
      true,
    );
    let mut engine = DataFlowEngine::new(&p, &cfg, &tree, None);
    engine.perform().unwrap();
    assert!(engine.can_gen_and_kill_for_structure(tree.root));
    assert_eq!(engine.stats.gen_kill_computations, cfg.num_blocks());
  }

  #[test]
  fn repeat_until_loop_is_summarisable() {
    // 1 -> 2 -> {1, 3}: the latch 2 either loops or leaves.
    let func = cfg_func(&[&[1], &[2], &[1, 3], &[]], &[3]);
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let p = problem(Direction::Backward, Meet::Intersection, vec![], true);
    let engine = DataFlowEngine::new(&p, &cfg, &tree, None);
    let lp = tree.containing_loop(BlockIx::new(2)).unwrap();
    assert!(engine.can_gen_and_kill_for_structure(lp));
  }

  #[test]
  fn interrupt_is_reported() {
    // A straight line long enough for the predicate to be polled.
    let mut succs: Vec<Vec<u32>> = (0..40).map(|i| vec![i + 1]).collect();
    succs.push(vec![]);
    let succ_refs: Vec<&[u32]> = succs.iter().map(|v| &v[..]).collect();
    let func = cfg_func(&succ_refs, &[40]);
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let p = problem(Direction::Backward, Meet::Intersection, vec![], true);
    let always = || true;
    let mut engine = DataFlowEngine::new(&p, &cfg, &tree, Some(&always));
    match engine.perform() {
      Err(ShrinkWrapError::Interrupted) => {}
      other => panic!("expected interruption, got {:?}", other.map(|_| ())),
    }

    let never = || false;
    let mut engine = DataFlowEngine::new(&p, &cfg, &tree, Some(&never));
    assert!(engine.perform().is_ok());
    assert!(engine.iterations() >= INTERRUPT_POLL_INTERVAL);
  }

  #[test]
  fn infinite_loop_is_still_analysed() {
    // 0 -> 1 -> 1 forever; END unreachable.
    let func = cfg_func(&[&[1], &[1]], &[]);
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let p = problem(
      Direction::Backward,
      Meet::Intersection,
      vec![vec![], vec![4]],
      true,
    );
    let mut engine = DataFlowEngine::new(&p, &cfg, &tree, None);
    let sol = engine.perform().unwrap();
    assert!(sol.in_sets[BlockIx::new(1)].contains(4));
    assert!(sol.in_sets[BlockIx::new(0)].contains(4));
  }
}
