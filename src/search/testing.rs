//! Minimal search space for unit tests: a program is the list of choices made
//! so far and every transformation is the index of the chosen candidate.

use super::expansion::{Candidate, CandidateGenerator, Classification};
use super::tree::Node;
use super::{Space, Stage};

pub(crate) struct Toy;

impl Space for Toy {
    type Operation = ();
    type Program = Vec<u32>;
    type Transformation = u32;
}

/// Proposes the same number of candidates for every node.
pub(crate) struct Fanout(pub(crate) usize);

impl CandidateGenerator<Toy> for Fanout {
    fn candidates(
        &mut self,
        node: &Node<Toy>,
        _stage: Stage,
        _classification: &Classification<()>,
    ) -> anyhow::Result<Vec<Candidate<Toy>>> {
        Ok((0..self.0)
            .map(|choice| {
                let choice = u32::try_from(choice).unwrap();
                let mut program = node.program().clone();
                program.push(choice);
                Candidate::extending(node, program, choice)
            })
            .collect())
    }
}
