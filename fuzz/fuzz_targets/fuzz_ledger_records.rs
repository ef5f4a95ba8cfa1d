#![no_main]

use libfuzzer_sys::fuzz_target;
use trawl_store::{PayeeAccount, PaymentRecord, PendingPayment};

// The LMDB ledger decodes records with bincode; corrupt bytes must surface as
// errors, not panics or runaway allocations.
fuzz_target!(|data: &[u8]| {
    let _ = bincode::deserialize::<PayeeAccount>(data);
    let _ = bincode::deserialize::<PendingPayment>(data);
    let _ = bincode::deserialize::<PaymentRecord>(data);
});
