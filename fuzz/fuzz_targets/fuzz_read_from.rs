#![no_main]
use libfuzzer_sys::fuzz_target;
use safeview::{SafeTensors, TensorSource};

fuzz_target!(|data: &[u8]| {
    let streamed = SafeTensors::read_from(data);
    let borrowed = SafeTensors::deserialize(data);
    assert_eq!(streamed.is_ok(), borrowed.is_ok());

    if let (Ok(streamed), Ok(borrowed)) = (streamed, borrowed) {
        for (name, view) in borrowed.tensors() {
            assert_eq!(streamed.tensor(name).unwrap(), view);
        }
    }
});
