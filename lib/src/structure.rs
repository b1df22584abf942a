/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The structure tree: blocks grouped into nested regions.  Natural loops
//! come from back edges (Muchnick Fig 7.21); strongly connected parts of the
//! graph entered other than through a dominating header become improper
//! regions; everything else hangs off one acyclic root region.

use log::debug;
use smallvec::SmallVec;

use crate::analysis::CfgInfo;
use crate::bit_set::BitSet;
use crate::data_structures::{BlockIx, StructIx, TypedIxVec};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructureKind {
  Block,
  NaturalLoop,
  Improper,
  Acyclic,
}

pub type StructList = SmallVec<[StructIx; 4]>;

#[derive(Clone, Debug)]
pub struct Structure {
  pub kind: StructureKind,
  /// The block control enters through.  For an improper region, the member
  /// earliest in reverse postorder.
  pub entry: BlockIx,
  pub parent: Option<StructIx>,
  pub blocks: BitSet,
  /// Direct children, ordered by reverse postorder of their entries.
  pub children: Vec<StructIx>,
  /// Sibling-level successors and predecessors within the parent region.
  pub succs: StructList,
  pub preds: StructList,
  /// Edges leaving, and entering, this structure's block set.
  pub exit_edges: Vec<(BlockIx, BlockIx)>,
  pub entry_edges: Vec<(BlockIx, BlockIx)>,
  pub contains_improper: bool,
}

impl Structure {
  fn new(kind: StructureKind, entry: BlockIx, blocks: BitSet) -> Self {
    Self {
      kind,
      entry,
      parent: None,
      blocks,
      children: vec![],
      succs: StructList::new(),
      preds: StructList::new(),
      exit_edges: vec![],
      entry_edges: vec![],
      contains_improper: false,
    }
  }

  pub fn is_block(&self) -> bool {
    self.kind == StructureKind::Block
  }

  pub fn contains(&self, bix: BlockIx) -> bool {
    self.blocks.contains(bix.get())
  }
}

pub struct StructureTree {
  /// Leaves first (`StructIx` == `BlockIx`), then the root, then regions.
  pub nodes: TypedIxVec<StructIx, Structure>,
  pub root: StructIx,
  pub back_edges: Vec<(BlockIx, BlockIx)>,
}

// Blocks from which |target| can be reached by walking predecessors from
// |from| without passing through |target|.
fn natural_loop_body(cfg: &CfgInfo, from: BlockIx, header: BlockIx) -> BitSet {
  let mut body = BitSet::unit(header.get());
  body.insert(from.get());
  if from != header {
    let mut stack = vec![from];
    while let Some(p) = stack.pop() {
      for q in cfg.flow_preds(p) {
        if !body.contains(q.get()) {
          body.insert(q.get());
          stack.push(q);
        }
      }
    }
  }
  body
}

fn reach(cfg: &CfgInfo, from: BlockIx, forwards: bool) -> BitSet {
  let mut seen = BitSet::unit(from.get());
  let mut stack = vec![from];
  while let Some(b) = stack.pop() {
    let next: Vec<BlockIx> = if forwards {
      cfg.flow_succs(b).collect()
    } else {
      cfg.flow_preds(b).collect()
    };
    for n in next {
      if !seen.contains(n.get()) {
        seen.insert(n.get());
        stack.push(n);
      }
    }
  }
  seen
}

impl StructureTree {
  #[inline(never)]
  pub fn build(cfg: &CfgInfo) -> Self {
    let num_blocks = cfg.num_blocks();

    // === BEGIN find loops ===
    //
    // A back edge m->n is some edge m->n where n dominates m.  Loops sharing
    // a header are merged.  A retreating edge whose target does not dominate
    // its source makes the graph irreducible there.
    let mut back_edges = Vec::<(BlockIx, BlockIx)>::new();
    let mut loops = Vec::<(BlockIx, BitSet)>::new();
    let mut irreducible_edges = Vec::<(BlockIx, BlockIx)>::new();
    for m in cfg.rpo.iter().cloned() {
      for n in cfg.flow_succs(m) {
        if cfg.dominates(n, m) {
          back_edges.push((m, n));
          let body = natural_loop_body(cfg, m, n);
          match loops.iter_mut().find(|(h, _)| *h == n) {
            Some((_, blocks)) => blocks.union(&body),
            None => loops.push((n, body)),
          }
        } else if cfg.is_back_edge(m, n) {
          irreducible_edges.push((m, n));
        }
      }
    }

    let mut improper = Vec::<BitSet>::new();
    for (_, n) in irreducible_edges.iter() {
      let mut scc = reach(cfg, *n, true);
      scc.intersect(&reach(cfg, *n, false));
      if !improper.iter().any(|s| *s == scc) {
        improper.push(scc);
      }
    }
    // === END find loops ===

    let mut regions = Vec::<(StructureKind, BlockIx, BitSet)>::new();
    for (header, blocks) in loops {
      if improper.iter().any(|scc| blocks.is_subset_of(scc)) {
        continue;
      }
      regions.push((StructureKind::NaturalLoop, header, blocks));
    }
    for scc in improper {
      let entry = scc
        .iter()
        .map(BlockIx::new)
        .min_by_key(|b| cfg.rpo_index[*b])
        .unwrap_or(cfg.start);
      regions.push((StructureKind::Improper, entry, scc));
    }
    // Smallest first, so the first strict superset found is the parent.
    regions.sort_by_key(|r| (r.2.card(), r.1.get()));

    let mut nodes = TypedIxVec::<StructIx, Structure>::new();
    for b in 0..num_blocks {
      let bix = BlockIx::new(b);
      nodes.push(Structure::new(StructureKind::Block, bix, BitSet::unit(b)));
    }
    let root = StructIx::new(num_blocks);
    nodes.push(Structure::new(
      StructureKind::Acyclic,
      cfg.start,
      BitSet::full(num_blocks),
    ));
    let first_region = num_blocks + 1;
    for (kind, entry, blocks) in regions.iter() {
      nodes.push(Structure::new(*kind, *entry, blocks.clone()));
    }

    // Parents.
    for b in 0..num_blocks {
      let parent = regions
        .iter()
        .position(|r| r.2.contains(b))
        .map(|i| StructIx::new(first_region + i as u32))
        .unwrap_or(root);
      nodes[StructIx::new(b)].parent = Some(parent);
    }
    for i in 0..regions.len() {
      let parent = (i + 1..regions.len())
        .find(|j| {
          regions[i].2.is_subset_of(&regions[*j].2)
            && regions[i].2 != regions[*j].2
        })
        .map(|j| StructIx::new(first_region + j as u32))
        .unwrap_or(root);
      nodes[StructIx::new(first_region + i as u32)].parent = Some(parent);
    }

    // Children, in reverse postorder of their entries.  END sorts last when
    // it is unreachable.
    for six in StructIx::new(0).dotdot(StructIx::new(nodes.len())) {
      if let Some(parent) = nodes[six].parent {
        nodes[parent].children.push(six);
      }
    }
    for six in StructIx::new(0).dotdot(StructIx::new(nodes.len())) {
      let mut children = std::mem::replace(&mut nodes[six].children, vec![]);
      children.sort_by_key(|c| (cfg.rpo_index[nodes[*c].entry], c.get()));
      nodes[six].children = children;
    }

    let mut tree = StructureTree { nodes, root, back_edges };

    // Entry and exit edges of every structure, and sibling-level flow.
    for six in StructIx::new(0).dotdot(StructIx::new(tree.nodes.len())) {
      let blocks = tree.nodes[six].blocks.clone();
      let mut exits = vec![];
      let mut entries = vec![];
      for b in blocks.iter().map(BlockIx::new) {
        for s in cfg.flow_succs(b) {
          if !blocks.contains(s.get()) {
            exits.push((b, s));
          }
        }
        for p in cfg.flow_preds(b) {
          if !blocks.contains(p.get()) {
            entries.push((p, b));
          }
        }
      }
      tree.nodes[six].exit_edges = exits;
      tree.nodes[six].entry_edges = entries;
    }
    for six in StructIx::new(0).dotdot(StructIx::new(tree.nodes.len())) {
      let parent = match tree.nodes[six].parent {
        Some(p) => p,
        None => continue,
      };
      let exits = tree.nodes[six].exit_edges.clone();
      for (_, to) in exits {
        if let Some(sibling) = tree.child_of(parent, to) {
          if !tree.nodes[six].succs.contains(&sibling) {
            tree.nodes[six].succs.push(sibling);
            tree.nodes[sibling].preds.push(six);
          }
        }
      }
    }

    debug!(
      "StructureTree::build: {} blocks, {} regions, {} back edges",
      num_blocks,
      regions.len(),
      tree.back_edges.len()
    );
    tree
  }

  pub fn leaf(&self, bix: BlockIx) -> StructIx {
    StructIx::from_block(bix)
  }

  pub fn node(&self, six: StructIx) -> &Structure {
    &self.nodes[six]
  }

  /// The direct child of `region` that contains `bix`, if `bix` lies within
  /// `region` at all.
  pub fn child_of(&self, region: StructIx, bix: BlockIx) -> Option<StructIx> {
    let mut six = self.leaf(bix);
    loop {
      let parent = self.nodes[six].parent?;
      if parent == region {
        return Some(six);
      }
      six = parent;
    }
  }

  /// Flag improper regions and every region enclosing one.  Returns whether
  /// any improper region exists.
  pub fn mark_structures_with_improper_regions(&mut self) -> bool {
    let mut found = false;
    for six in StructIx::new(0).dotdot(StructIx::new(self.nodes.len())) {
      if self.nodes[six].kind != StructureKind::Improper {
        continue;
      }
      found = true;
      let mut cur = Some(six);
      while let Some(s) = cur {
        self.nodes[s].contains_improper = true;
        cur = self.nodes[s].parent;
      }
    }
    found
  }

  /// The innermost natural loop containing `bix`.
  pub fn containing_loop(&self, bix: BlockIx) -> Option<StructIx> {
    let mut cur = self.nodes[self.leaf(bix)].parent;
    while let Some(s) = cur {
      if self.nodes[s].kind == StructureKind::NaturalLoop {
        return Some(s);
      }
      cur = self.nodes[s].parent;
    }
    None
  }

  /// The outermost natural loop containing `bix`.
  pub fn outermost_loop(&self, bix: BlockIx) -> Option<StructIx> {
    let mut res = None;
    let mut cur = self.nodes[self.leaf(bix)].parent;
    while let Some(s) = cur {
      if self.nodes[s].kind == StructureKind::NaturalLoop {
        res = Some(s);
      }
      cur = self.nodes[s].parent;
    }
    res
  }

  pub fn is_in_loop(&self, bix: BlockIx) -> bool {
    self.containing_loop(bix).is_some()
  }

  pub fn is_loop_header(&self, bix: BlockIx) -> bool {
    match self.containing_loop(bix) {
      Some(l) => self.nodes[l].entry == bix,
      None => false,
    }
  }
}
