#![no_main]
use libfuzzer_sys::fuzz_target;
use mlsched::kernel::{generators, Kernel};
use mlsched::search::{CandidateGenerator, Node, TransformationKind};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(kernel) = Kernel::try_from(s) else {
        return;
    };
    // Interchange enumerates every permutation of a nest.
    if kernel.operations().iter().any(|op| op.loops().len() > 5) {
        return;
    }
    let classification = kernel.classify();
    let node = Node::root(kernel, 0);
    for kind in TransformationKind::DEFAULT_PIPELINE {
        let mut generator = generators::generator(kind);
        // Every generated transformation applies cleanly.
        let candidates = generator.candidates(&node, 0, &classification).unwrap();
        for candidate in candidates {
            assert_eq!(candidate.history.len(), 1);
        }
    }
});
