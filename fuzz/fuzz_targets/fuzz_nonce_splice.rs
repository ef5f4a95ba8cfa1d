#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use trawl_proxy::work::{parse_nonce, splice_nonce};

#[derive(Arbitrary, Debug)]
struct Input {
    nonce: String,
    blob: String,
}

// Miner-supplied nonces and daemon blobs must never panic the splicer, and a
// successful splice must round-trip the nonce at byte offset 1.
fuzz_target!(|input: Input| {
    let Ok(nonce) = parse_nonce(&input.nonce) else {
        return;
    };
    let Ok(spliced) = splice_nonce(&input.blob, nonce) else {
        return;
    };
    let bytes = hex::decode(&spliced).expect("splice produced invalid hex");
    let mut le = [0u8; 8];
    le.copy_from_slice(&bytes[1..9]);
    assert_eq!(u64::from_le_bytes(le), nonce);
});
