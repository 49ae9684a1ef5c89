#![no_main]
use libfuzzer_sys::fuzz_target;
use safeview::{SafeTensors, TensorSource};

fuzz_target!(|data: &[u8]| {
    let loaded = match SafeTensors::deserialize(data) {
        Ok(t) => t,
        Err(_) => return,
    };

    for (_, view) in loaded.tensors() {
        let _ = view.to_vec::<f32>();
    }

    // Anything that decodes must re-encode and decode again.
    let mut out = Vec::new();
    loaded.write_to(&mut out).unwrap();
    let again = SafeTensors::deserialize(&out).unwrap();
    assert_eq!(again.len(), loaded.len());
});
