/// Integration tests for budget core

#[cfg(test)]
mod tests {
    use budget_core::capability::{resolve, CapabilityResolver, CapabilityTable};
    use budget_core::context::{Content, ContentPart, Role, TokenCounter, Turn};
    use budget_core::cost::{IndexingCostEstimator, PricingTable};
    use budget_core::observability::MetricsCollector;
    use budget_core::{BudgetConfig, ContextWindowManager, Conversation, HistoryTruncator, PromptError};
    use std::sync::Arc;

    fn char_counter() -> TokenCounter {
        TokenCounter::new(Arc::new(|text: &str| -> anyhow::Result<Vec<u32>> {
            Ok(text.chars().map(|c| c as u32).collect())
        }))
    }

    #[test]
    fn test_count_mixed_turn_with_stub_encoder() {
        let turn = Turn::new(
            Role::User,
            Content::Parts(vec![
                ContentPart::text("ab"),
                ContentPart::text("cde"),
                ContentPart::image("data:image/png;base64,iVBORw0KGgo="),
            ]),
        );
        assert_eq!(char_counter().count_turn(&turn).unwrap(), 2 + 3 + 85);
    }

    #[test]
    fn test_truncation_example() {
        let turns = vec![
            Turn::system("system prompt"),
            Turn::user("a very long pasted document"),
            Turn::assistant("summary"),
            Turn::user("follow-up"),
        ];
        let counts = [10, 5000, 100, 20];

        let out = HistoryTruncator::default().truncate(&turns, &counts, 5050).unwrap();
        let kept_roles: Vec<Role> = out.iter().map(|t| t.role).collect();
        assert_eq!(kept_roles, vec![Role::System, Role::Assistant, Role::User]);
        assert_eq!(out.last(), turns.last());

        let kept_tokens: usize = out
            .iter()
            .map(|t| counts[turns.iter().position(|o| o.id == t.id).unwrap()])
            .sum();
        assert!(kept_tokens <= 5050);
    }

    #[test]
    fn test_structural_errors_propagate() {
        let turns = vec![Turn::user("q"), Turn::system("late system")];
        let err = HistoryTruncator::default().truncate(&turns, &[1, 1], 1000).unwrap_err();
        assert!(matches!(err, PromptError::InvalidLastTurn(Role::System)));
    }

    #[test]
    fn test_resolution_through_proxy_and_tag() {
        let config = BudgetConfig::default();
        let table = Arc::new(CapabilityTable::build(&config.merged_overrides()).unwrap());

        let plain = resolve(&table, "openai", "gpt-4").unwrap();
        let tagged = resolve(&table, "openai", "gpt-4:latest").unwrap();
        assert_eq!(plain.record, tagged.record);

        let resolver = CapabilityResolver::new(table, config.resolver_settings().unwrap());
        assert_eq!(resolver.max_tokens("ollama", "corp-proxy/gemma3:27b"), 32_000);
        assert!(resolver.supports_image_input("ollama", "gemma3:12b"));
        assert_eq!(resolver.max_input_tokens("nobody", "unknown-model", 1024), 4096 - 1024);
    }

    #[test]
    fn test_manage_context_end_to_end() {
        let config = BudgetConfig::from_toml_str(
            r#"
            reserved_output_tokens = 0

            [[capability_overrides]]
            key = "local/small"
            max_tokens = 60
            "#,
        )
        .unwrap();
        let table = Arc::new(CapabilityTable::build(&config.merged_overrides()).unwrap());
        let metrics = MetricsCollector::new().unwrap();
        let manager = ContextWindowManager::from_config(
            &config,
            table,
            Arc::new(|text: &str| -> anyhow::Result<Vec<u32>> { Ok(vec![0; text.len()]) }),
        )
        .unwrap()
        .with_metrics(metrics.clone());

        let mut conversation = Conversation::new();
        conversation.push(Turn::system("be nice"));
        conversation.push(Turn::user("first question here"));
        conversation.push(Turn::assistant("first answer"));
        conversation.push(Turn::user("second"));

        let prompt = manager.manage_context(&mut conversation, "local", "small").unwrap();
        assert_eq!(prompt.budget, 60);
        assert_eq!(prompt.turns.first().map(|t| t.role), Some(Role::System));
        assert_eq!(prompt.turns.last(), conversation.turns.last());
        assert!(prompt.token_count <= prompt.budget);
        assert_eq!(metrics.get_stats().prompts_assembled, 1);
        assert_eq!(metrics.get_stats().turns_dropped, prompt.dropped as u64);
    }

    #[test]
    fn test_edited_history_recounted_before_truncation() {
        let config = BudgetConfig::from_toml_str(
            r#"
            reserved_output_tokens = 0

            [[capability_overrides]]
            key = "local/small"
            max_tokens = 60
            "#,
        )
        .unwrap();
        let table = Arc::new(CapabilityTable::build(&config.merged_overrides()).unwrap());
        let manager = ContextWindowManager::from_config(
            &config,
            table,
            Arc::new(|text: &str| -> anyhow::Result<Vec<u32>> { Ok(vec![0; text.len()]) }),
        )
        .unwrap();

        let mut conversation = Conversation::from_turns(vec![
            Turn::user("short"),
            Turn::assistant("ok"),
            Turn::user("next"),
        ]);
        let first = manager.manage_context(&mut conversation, "local", "small").unwrap();
        assert_eq!(first.dropped, 0);

        conversation.turns[0].content = Content::Text("x".repeat(500));
        let second = manager.manage_context(&mut conversation, "local", "small").unwrap();
        assert_eq!(second.dropped, 1);
        assert!(second.token_count <= second.budget);
        assert_eq!(second.turns.first().map(|t| t.role), Some(Role::Assistant));
    }

    #[test]
    fn test_indexing_cost_never_fails() {
        let pricing = PricingTable::builtin().unwrap();
        let metrics = MetricsCollector::new().unwrap();
        let estimator = IndexingCostEstimator::new(pricing, Default::default()).with_metrics(metrics.clone());

        assert_eq!(estimator.estimate("acme", "not-a-real-model"), 0.0);
        assert_eq!(metrics.get_stats().pricing_fallbacks, 1);
        assert!(estimator.estimate("openai", "gpt-4o-mini") > 0.0);
    }
}
