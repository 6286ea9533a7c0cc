#![no_main]
use libfuzzer_sys::fuzz_target;
use titrator_core::{PumpModel, PumpRate};

fuzz_target!(|data: &str| {
    let parsed = PumpRate::parse(data);
    // The config validator and the pump parser agree on what a rate is.
    assert_eq!(
        parsed.is_ok(),
        titrator_config::is_rate_string(data.trim()),
        "{data:?}"
    );
    let Ok(rate) = parsed else {
        return;
    };
    assert!(rate.ml_per_min() >= 0.0 && rate.ml_per_min() < 100.0);
    for model in [PumpModel::Qhzs, PumpModel::Harvard, PumpModel::Arduino] {
        let cmds = model.set_rate_commands(&rate);
        assert!(!cmds.is_empty());
        assert!(cmds.iter().all(|c| c.is_ascii() && !c.contains('\n')));
    }
});
