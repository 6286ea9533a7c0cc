#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parsing and validation may reject input but must never panic.
    let Ok(cfg) = titrator_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_ok() {
        // A valid file must survive the save path's serializer and still validate.
        let text = cfg.to_toml_string().expect("serialize valid config");
        let back = toml::from_str::<titrator_config::Config>(&text).expect("reparse");
        assert_eq!(back, cfg);
        // Everything validate() accepts must also convert into runtime settings.
        let _ = titrator_core::TitrationController::builder()
            .apply_config(&cfg)
            .expect("validated config converts");
    }
});
