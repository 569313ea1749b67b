use crate::SessionState;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Reddit,
    #[value(name = "linkedin")]
    LinkedIn,
    X,
    Gmail,
}

impl Platform {
    pub const ALL: [Platform; 4] = [Self::Reddit, Self::LinkedIn, Self::X, Self::Gmail];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reddit => "reddit",
            Self::LinkedIn => "linkedin",
            Self::X => "x",
            Self::Gmail => "gmail",
        }
    }

    pub fn output_file_name(self) -> String {
        format!("{}_content.json", self.as_str())
    }

    fn instructions(self) -> &'static str {
        match self {
            Self::Reddit => {
                "Write an authentic, non-promotional Reddit post. Provide `title`, `content`, \
                 and `subreddits` (list of suggested subreddits)."
            }
            Self::LinkedIn => {
                "Write a professional LinkedIn post aimed at investors and operators. Provide \
                 `headline`, `content`, and `hashtags`."
            }
            Self::X => {
                "Write an X post. Provide `main_tweet` (at most 280 characters), `thread` \
                 (list of follow-up posts), and `hashtags`."
            }
            Self::Gmail => {
                "Write a cold email to an investor. Provide `subject_line`, `greeting`, `body`, \
                 `closing`, and `call_to_action`."
            }
        }
    }

    pub fn build_prompt(self, session: &SessionState) -> String {
        format!(
            "Startup idea: {idea}\n\
             Current phase: {phase}\n\
             Market phase complete: {complete}\n\
             Conversation history: {history} messages\n\
             Market insights: {insights} items\n\
             \n\
             {instructions}\n\
             \n\
             Reply with a single JSON object of the form \
             {{\"content\": {{...}}, \"quality_score\": <integer 0-100>}} and nothing else.",
            idea = session.startup_idea,
            phase = session.current_phase,
            complete = session.market_phase_complete,
            history = session.conversation_history.len(),
            insights = session.key_market_insights.len(),
            instructions = self.instructions(),
        )
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::parse_session;

    #[test]
    fn prompt_carries_session_facts() {
        let session = parse_session(
            r#"{"startup_idea": "Drone deliveries", "current_phase": "validation",
                "key_market_insights": ["a", "b", "c"]}"#,
        )
        .unwrap();

        let prompt = Platform::X.build_prompt(&session);
        assert!(prompt.contains("Startup idea: Drone deliveries"));
        assert!(prompt.contains("Current phase: validation"));
        assert!(prompt.contains("Market insights: 3 items"));
        assert!(prompt.contains("main_tweet"));
        assert!(prompt.contains("\"quality_score\""));
    }

    #[test]
    fn names_round_trip_through_serde() {
        assert_eq!(serde_json::to_string(&Platform::LinkedIn).unwrap(), "\"linkedin\"");
        assert_eq!(Platform::Gmail.output_file_name(), "gmail_content.json");
    }
}
