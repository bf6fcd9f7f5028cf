#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_empty_config_gets_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.pipeline.worker_concurrency, 4);
        assert_eq!(config.pipeline.max_works_per_researcher, 200);
        assert_eq!(config.pipeline.request_delay_ms, 500);
        assert_eq!(config.pipeline.cache_flush_every, 5);
        assert!(!config.pipeline.full_refresh);
        assert!(!config.pipeline.skip_ai);
        assert_eq!(config.llm.backend, "ollama");
        assert_eq!(config.output.data_root, "./data");
        assert!(config.output.mirror_root.is_none());
        assert_eq!(config.seed.path, "./data/researchers.json");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            worker_concurrency = 8
            skip_ai = true

            [llm]
            backend = "openai"
            model = "gpt-4o-mini"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.worker_concurrency, 8);
        assert!(config.pipeline.skip_ai);
        assert_eq!(config.pipeline.max_works_per_researcher, 200);
        assert_eq!(config.llm.backend, "openai");
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_config_api_key_wins_over_env() {
        let mut config = Config::default();
        config.llm.backend = "openai".to_string();
        config.llm.api_key = Some("sk-from-file".to_string());
        assert_eq!(config.resolved_api_key().as_deref(), Some("sk-from-file"));
    }

    #[test]
    fn test_local_backend_needs_no_key() {
        let config = Config::default();
        assert!(config.resolved_api_key().is_none());
    }
}
