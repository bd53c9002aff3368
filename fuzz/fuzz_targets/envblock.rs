#![no_main]

use libfuzzer_sys::fuzz_target;
use dotpal::environment::Environment;

fuzz_target!(|data: &[u8]| {
    let Some((&mode, data)) = data.split_first() else {
        return;
    };
    let case_insensitive = mode & 1 == 1;
    let env = Environment::from_block(data, case_insensitive);
    let block = env.environment_block();
    assert_eq!(
        Environment::from_block(&block, case_insensitive).snapshot(),
        env.snapshot()
    );
});
