#![no_main]

use libfuzzer_sys::fuzz_target;
use trawl_proxy::work::{parse_height, target_to_difficulty};
use trawl_proxy::BlockTemplate;
use trawl_rpc::WorkReply;

// Parse arbitrary JSON as a getwork reply and build a template from it.
// Malformed replies must be errors, never panics.
fuzz_target!(|data: &[u8]| {
    let Ok(parts) = serde_json::from_slice::<Vec<String>>(data) else {
        return;
    };
    let Ok(work) = WorkReply::from_parts(parts) else {
        return;
    };
    let _ = target_to_difficulty(&work.target);
    let _ = parse_height(&work.height_hex);
    if let Ok(template) = BlockTemplate::build(None, "0xprev".to_string(), work, 3) {
        assert!(template.lookup(&template.header).is_some());
    }
});
