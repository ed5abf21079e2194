//! Sequential impulse solver over conflict-free batches.
//!
//! The solver works on [`SolverBody`] snapshots, not on rigid bodies. Each
//! tick it runs `do_update` once per constraint, then repeats the batch
//! sequence for the configured number of iterations. Batches run strictly in
//! order; the members of one batch touch disjoint merging bodies, so with the
//! `parallel` feature they are solved concurrently on body copies and their
//! velocity changes scattered back afterwards.

use std::collections::HashMap;

use crate::constraint::{ConstraintSolver, ContactReport, SolverBody, StepContext};
use crate::graph::ConstraintLink;
use crate::object::ObjectId;

/// What a solve produced besides new velocities.
#[derive(Debug, Default)]
pub struct SolveOutcome {
    /// Bodies that some constraint asked to keep awake.
    pub woken: Vec<ObjectId>,
    /// Contact reports, one per resolved contact.
    pub reports: Vec<ContactReport>,
}

/// Solver body storage and the batch loop.
#[derive(Debug, Default)]
pub struct Solver {
    bodies: Vec<SolverBody>,
    lookup: HashMap<ObjectId, usize>,
    woken: Vec<bool>,
}

impl Solver {
    /// Solver with no bodies loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the body snapshot set.
    pub fn load(&mut self, bodies: impl IntoIterator<Item = SolverBody>) {
        self.bodies.clear();
        self.lookup.clear();
        for body in bodies {
            self.lookup.insert(body.id, self.bodies.len());
            self.bodies.push(body);
        }
        self.woken.clear();
        self.woken.resize(self.bodies.len(), false);
    }

    /// Snapshot of `id`, if loaded.
    pub fn body(&self, id: ObjectId) -> Option<&SolverBody> {
        self.lookup.get(&id).map(|&i| &self.bodies[i])
    }

    /// Every loaded snapshot.
    pub fn bodies(&self) -> &[SolverBody] {
        &self.bodies
    }

    /// Graph view of `constraint`.
    pub fn link(&self, constraint: &dyn ConstraintSolver) -> ConstraintLink {
        let (a, b) = constraint.bodies();
        let merges = |id| self.body(id).is_some_and(|body| body.merges);
        ConstraintLink {
            a,
            b,
            a_merges: merges(a),
            b_merges: merges(b),
        }
    }

    /// Snapshot for `id`, or an immovable stand-in if it is not loaded.
    fn snapshot(&self, id: ObjectId) -> SolverBody {
        self.body(id).copied().unwrap_or_else(|| SolverBody::fixed(id))
    }

    /// Runs the update phase and `iterations` passes over `batches`.
    ///
    /// `batches` holds indices into `constraints`; every index must appear
    /// in exactly one batch.
    pub fn solve(
        &mut self,
        constraints: Vec<&mut dyn ConstraintSolver>,
        batches: &[Vec<usize>],
        iterations: u32,
        ctx: &StepContext,
    ) -> SolveOutcome {
        self.solve_with(constraints, batches, iterations, ctx, Self::run_batch)
    }

    fn solve_with(
        &mut self,
        constraints: Vec<&mut dyn ConstraintSolver>,
        batches: &[Vec<usize>],
        iterations: u32,
        ctx: &StepContext,
        run_batch: fn(&mut Self, &mut [&mut dyn ConstraintSolver], &StepContext),
    ) -> SolveOutcome {
        let mut ordered = order_by_batch(constraints, batches);
        let ranges: Vec<_> = batches
            .iter()
            .scan(0, |start, batch| {
                let range = *start..*start + batch.len();
                *start = range.end;
                Some(range)
            })
            .collect();

        for c in ordered.iter_mut() {
            let (a, b) = c.bodies();
            let (a, b) = (self.snapshot(a), self.snapshot(b));
            c.do_update(&a, &b, ctx);
        }

        for _ in 0..iterations {
            for range in &ranges {
                run_batch(self, &mut ordered[range.clone()], ctx);
            }
        }

        let mut outcome = SolveOutcome::default();
        for (i, woken) in self.woken.iter_mut().enumerate() {
            if std::mem::take(woken) {
                outcome.woken.push(self.bodies[i].id);
            }
        }
        outcome
            .reports
            .extend(ordered.iter_mut().filter_map(|c| c.take_report()));
        outcome
    }

    #[cfg(not(feature = "parallel"))]
    fn run_batch(&mut self, batch: &mut [&mut dyn ConstraintSolver], ctx: &StepContext) {
        self.run_batch_in_order(batch, ctx);
    }

    #[cfg(feature = "parallel")]
    fn run_batch(&mut self, batch: &mut [&mut dyn ConstraintSolver], ctx: &StepContext) {
        self.run_batch_parallel(batch, ctx);
    }

    #[cfg_attr(feature = "parallel", allow(dead_code))]
    fn run_batch_in_order(&mut self, batch: &mut [&mut dyn ConstraintSolver], ctx: &StepContext) {
        for c in batch.iter_mut() {
            let (a, b) = c.bodies();
            let (ia, ib) = (self.lookup.get(&a).copied(), self.lookup.get(&b).copied());
            let mut fixed_a = SolverBody::fixed(a);
            let mut fixed_b = SolverBody::fixed(b);
            let wake = match (ia, ib) {
                (Some(ia), Some(ib)) if ia != ib => {
                    let (body_a, body_b) = pair_mut(&mut self.bodies, ia, ib);
                    c.do_constraint(body_a, body_b, ctx)
                }
                (Some(ia), None) => c.do_constraint(&mut self.bodies[ia], &mut fixed_b, ctx),
                (None, Some(ib)) => c.do_constraint(&mut fixed_a, &mut self.bodies[ib], ctx),
                _ => continue,
            };
            if wake {
                self.mark_woken(ia, ib);
            }
        }
    }

    #[cfg(feature = "parallel")]
    fn run_batch_parallel(&mut self, batch: &mut [&mut dyn ConstraintSolver], ctx: &StepContext) {
        use rayon::prelude::*;

        let this = &*self;
        let results: Vec<_> = batch
            .par_iter_mut()
            .map(|c| {
                let (a, b) = c.bodies();
                let (mut body_a, mut body_b) = (this.snapshot(a), this.snapshot(b));
                let (before_a, before_b) = (body_a, body_b);
                let wake = c.do_constraint(&mut body_a, &mut body_b, ctx);
                (
                    this.lookup.get(&a).copied(),
                    delta(&before_a, &body_a),
                    this.lookup.get(&b).copied(),
                    delta(&before_b, &body_b),
                    wake,
                )
            })
            .collect();

        // Merging bodies appear once per batch; shared immovable ones sum.
        for (ia, da, ib, db, wake) in results {
            if let Some(i) = ia {
                self.bodies[i].velocity += da.0;
                self.bodies[i].angular_velocity += da.1;
            }
            if let Some(i) = ib {
                self.bodies[i].velocity += db.0;
                self.bodies[i].angular_velocity += db.1;
            }
            if wake {
                self.mark_woken(ia, ib);
            }
        }
    }

    fn mark_woken(&mut self, a: Option<usize>, b: Option<usize>) {
        for i in a.into_iter().chain(b) {
            self.woken[i] = true;
        }
    }
}

#[cfg(feature = "parallel")]
fn delta(before: &SolverBody, after: &SolverBody) -> (glam::Vec3, glam::Vec3) {
    (
        after.velocity - before.velocity,
        after.angular_velocity - before.angular_velocity,
    )
}

/// Two distinct elements of `bodies`, in argument order.
fn pair_mut(bodies: &mut [SolverBody], a: usize, b: usize) -> (&mut SolverBody, &mut SolverBody) {
    if a < b {
        let (lo, hi) = bodies.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = bodies.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

/// Permutes constraints so each batch is a contiguous run.
fn order_by_batch<'a>(
    constraints: Vec<&'a mut dyn ConstraintSolver>,
    batches: &[Vec<usize>],
) -> Vec<&'a mut dyn ConstraintSolver> {
    let mut slots: Vec<Option<&'a mut dyn ConstraintSolver>> =
        constraints.into_iter().map(Some).collect();
    batches
        .iter()
        .flatten()
        .filter_map(|&i| slots.get_mut(i).and_then(Option::take))
        .collect()
}
