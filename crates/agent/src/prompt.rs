//! System-prompt assembly from the agent bundle and the live conversation
//! state. The prompt is rebuilt every turn so the model always sees the
//! current stage and the fields still missing.

use reservo_core::config::AgentBundle;
use reservo_core::state::ConversationState;

pub struct PromptBuilder<'a> {
    bundle: &'a AgentBundle,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(bundle: &'a AgentBundle) -> Self {
        Self { bundle }
    }

    pub fn build(&self, state: &ConversationState, intent: &str) -> String {
        let agent = &self.bundle.agent;
        let mut sections: Vec<String> = Vec::new();

        sections.push(format!("# РОЛЬ\n{}", agent.identity.role));
        sections.push(format!("# ХАРАКТЕР\n{}", agent.identity.persona));
        sections.push(format!(
            "# СТИЛЬ\nТон: {}. Обращение на «{}». Эмодзи: {}. Не больше {} предложений и {} вопроса за ответ.",
            agent.style.tone,
            agent.style.politeness,
            agent.style.emoji_policy,
            agent.style.max_sentences,
            agent.style.max_questions,
        ));

        if !agent.rules.is_empty() {
            let mut rules = String::from("# ВАЖНЫЕ ПРАВИЛА");
            for rule in &agent.rules {
                rules.push_str(&format!("\n- {}", rule.description));
                if let Some(example) = &rule.positive_example {
                    rules.push_str(&format!(" Пример: «{example}»"));
                }
            }
            sections.push(rules);
        }

        if !self.bundle.knowledge.is_empty() {
            let mut knowledge = String::from("# БАЗА ЗНАНИЙ");
            for (topic, content) in &self.bundle.knowledge {
                knowledge.push_str(&format!("\n## {topic}\n{}", content.trim()));
            }
            sections.push(knowledge);
        }

        sections.push(self.context_section(state, intent));
        sections.push(self.output_rules());

        sections.join("\n\n")
    }

    fn context_section(&self, state: &ConversationState, intent: &str) -> String {
        let flow = &state.flow;
        let data = &flow.booking_data;
        let mut lines = vec![format!(
            "# ТЕКУЩИЙ КОНТЕКСТ\nЭтап диалога: {}. Намерение клиента: {intent}.",
            flow.stage.as_str()
        )];

        let known: Vec<String> = [
            ("дата", &data.date),
            ("время", &data.time),
            ("часы", &data.duration),
            ("зал", &data.room),
            ("имя", &data.name),
            ("телефон", &data.phone),
        ]
        .iter()
        .filter_map(|(label, value)| value.as_deref().map(|v| format!("{label}: {v}")))
        .collect();
        if !known.is_empty() {
            lines.push(format!("Уже известно — {}.", known.join(", ")));
        }

        let missing = data.missing_required();
        if !missing.is_empty() {
            lines.push(format!(
                "Ещё не хватает: {}. Спроси про следующее недостающее поле, по одному за раз.",
                missing.join(", ")
            ));
        }
        if flow.booking_status.is_busy_like() {
            lines.push(
                "Запрошенный слот занят. Предложи другое время или другой зал.".to_string(),
            );
        }
        if flow.booking_finalized {
            lines.push("Бронь уже оформлена. Не создавай новую без явной просьбы.".to_string());
        }

        lines.join("\n")
    }

    fn output_rules(&self) -> String {
        let rooms = self.bundle.policy.booking.rooms.join(", ");
        format!(
            "# ПРАВИЛА ВЫВОДА\n\
             Доступные залы: {rooms}.\n\
             Когда все шесть полей собраны и клиент подтвердил бронь, добавь в конец ответа тег \
             [BOOKING:дата|время|часы|зал|имя|телефон].\n\
             Если клиент просит человека или ты не можешь помочь, добавь [ACTION:ESCALATE].\n\
             Если клиент хочет начать заново, добавь [ACTION:RESET].\n\
             Теги служебные: клиент их не видит, но не используй их без причины."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reservo_core::config::{AgentConfig, AgentIdentity, AgentStyle, DialoguePolicy, LlmSettings};
    use std::collections::BTreeMap;

    fn bundle() -> AgentBundle {
        let mut knowledge = BTreeMap::new();
        knowledge.insert("pricing".to_string(), "Час аренды — 2000 руб.".to_string());
        AgentBundle {
            agent: AgentConfig {
                id: "a1".into(),
                name: "Hall bot".into(),
                identity: AgentIdentity {
                    role: "Администратор студии".into(),
                    persona: "Вежливый и краткий".into(),
                    fallback_phrase: "Чем могу помочь?".into(),
                },
                style: AgentStyle::default(),
                rules: vec![],
                llm: LlmSettings::default(),
            },
            policy: DialoguePolicy::default(),
            knowledge,
        }
    }

    #[test]
    fn prompt_contains_role_knowledge_and_stage() {
        let mut state = ConversationState::default();
        state.flow.booking_data.room = Some("Грань".into());
        state.flow.stage = reservo_core::state::Stage::Offer;

        let prompt = PromptBuilder::new(&bundle()).build(&state, "BOOKING");
        assert!(prompt.contains("Администратор студии"));
        assert!(prompt.contains("2000 руб"));
        assert!(prompt.contains("Этап диалога: offer"));
        assert!(prompt.contains("зал: Грань"));
        assert!(prompt.contains("[BOOKING:"));
    }

    #[test]
    fn missing_fields_are_listed_for_the_model() {
        let mut state = ConversationState::default();
        state.flow.booking_data.date = Some("20.08.2026".into());
        let prompt = PromptBuilder::new(&bundle()).build(&state, "BOOKING");
        assert!(prompt.contains("Ещё не хватает"));
        assert!(prompt.contains("time"));
    }
}
