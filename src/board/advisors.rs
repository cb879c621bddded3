//! The five fixed advisor identities consulted by every board deliberation.

use crate::llm::provider_config::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisorRole {
    Finance,
    Growth,
    Operations,
    Risk,
    Product,
}

pub struct Advisor {
    pub role: AdvisorRole,
    pub name: &'static str,
    pub emoji: &'static str,
    pub preferred_provider: Provider,
    pub system_prompt: &'static str,
}

pub const ADVISORS: [Advisor; 5] = [
    Advisor {
        role: AdvisorRole::Finance,
        name: "Camille",
        emoji: "\u{1F4B0}",
        preferred_provider: Provider::Anthropic,
        system_prompt: "Tu es Camille, conseillère financière pour une petite entreprise. Tu évalues chaque question sous l'angle de la trésorerie, de la rentabilité et du risque financier. Sois concrète et chiffrée quand c'est possible.",
    },
    Advisor {
        role: AdvisorRole::Growth,
        name: "Younes",
        emoji: "\u{1F4C8}",
        preferred_provider: Provider::OpenAI,
        system_prompt: "Tu es Younes, conseiller en croissance et marketing pour une petite entreprise. Tu évalues chaque question sous l'angle de l'acquisition de clients, du positionnement et de l'opportunité de marché.",
    },
    Advisor {
        role: AdvisorRole::Operations,
        name: "Paola",
        emoji: "\u{2699}\u{FE0F}",
        preferred_provider: Provider::Gemini,
        system_prompt: "Tu es Paola, conseillère opérationnelle pour une petite entreprise. Tu évalues chaque question sous l'angle de la faisabilité, des processus, du personnel et des délais d'exécution.",
    },
    Advisor {
        role: AdvisorRole::Risk,
        name: "Idriss",
        emoji: "\u{1F6E1}\u{FE0F}",
        preferred_provider: Provider::Mistral,
        system_prompt: "Tu es Idriss, conseiller en gestion des risques et conformité pour une petite entreprise. Tu évalues chaque question sous l'angle juridique, réglementaire et des risques opérationnels ou réputationnels.",
    },
    Advisor {
        role: AdvisorRole::Product,
        name: "Saoirse",
        emoji: "\u{1F3A8}",
        preferred_provider: Provider::Grok,
        system_prompt: "Tu es Saoirse, conseillère produit et expérience client pour une petite entreprise. Tu évalues chaque question sous l'angle de la valeur livrée au client et de la différenciation produit.",
    },
];

/// Every `preferred_provider` must be pairwise distinct. Checked once at first use and logged as
/// a warning (not a hard failure) — a collision falls back to the default provider for the
/// duplicated/unavailable advisor rather than blocking deliberation entirely.
pub fn validate_advisor_providers() -> bool {
    let mut seen = std::collections::HashSet::new();
    for advisor in ADVISORS.iter() {
        if !seen.insert(advisor.preferred_provider) {
            log::warn!("advisor provider {} is used by more than one advisor", advisor.preferred_provider.as_str());
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_advisors_have_pairwise_distinct_providers() {
        assert!(validate_advisor_providers());
        assert_eq!(ADVISORS.len(), 5);
    }
}
