#![no_main]
use libfuzzer_sys::fuzz_target;
use mlsched::kernel::Kernel;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(kernel) = Kernel::try_from(s) {
            assert_eq!(kernel.classify().len(), kernel.operations().len());
            drop(kernel.to_string());
        }
    }
});
