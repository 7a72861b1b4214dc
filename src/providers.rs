//! Built-in backend presets for OpenAI-compatible routers.
//!
//! Each preset defines the base URL, how the credential is presented, and the
//! environment variable holding a fallback key. Users specify a provider name in
//! their config and the preset fills in the details.

/// How the credential goes into the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `Authorization: Key <key>` (fal.ai)
    Key,
}

impl AuthScheme {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "bearer" => Some(Self::Bearer),
            "key" => Some(Self::Key),
            _ => None,
        }
    }

    #[must_use]
    pub fn header_value(self, credential: &str) -> String {
        match self {
            Self::Bearer => format!("Bearer {credential}"),
            Self::Key => format!("Key {credential}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub auth_scheme: AuthScheme,
    pub default_api_key_env: &'static str,
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "fal",
        base_url: "https://fal.run/openrouter/router/openai/v1",
        auth_scheme: AuthScheme::Key,
        default_api_key_env: "FAL_KEY",
    },
    ProviderPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        auth_scheme: AuthScheme::Bearer,
        default_api_key_env: "OPENROUTER_API_KEY",
    },
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        auth_scheme: AuthScheme::Bearer,
        default_api_key_env: "OPENAI_API_KEY",
    },
    ProviderPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        auth_scheme: AuthScheme::Bearer,
        default_api_key_env: "DEEPSEEK_API_KEY",
    },
    ProviderPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        auth_scheme: AuthScheme::Bearer,
        default_api_key_env: "GROQ_API_KEY",
    },
    ProviderPreset {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        auth_scheme: AuthScheme::Bearer,
        default_api_key_env: "TOGETHER_API_KEY",
    },
    ProviderPreset {
        name: "fireworks",
        base_url: "https://api.fireworks.ai/inference/v1",
        auth_scheme: AuthScheme::Bearer,
        default_api_key_env: "FIREWORKS_API_KEY",
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        let name = name.to_lowercase();
        PRESETS.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        assert!(ProviderPreset::from_name("fal").is_some());
        assert!(ProviderPreset::from_name("OpenRouter").is_some()); // case-insensitive
        assert!(ProviderPreset::from_name("unknown_provider").is_none());
    }

    #[test]
    fn test_fal_uses_key_scheme() {
        let preset = ProviderPreset::from_name("fal").unwrap();
        assert_eq!(preset.auth_scheme, AuthScheme::Key);
        assert_eq!(preset.auth_scheme.header_value("abc"), "Key abc");
    }

    #[test]
    fn test_all_others_use_bearer() {
        for preset in ProviderPreset::all() {
            if preset.name != "fal" {
                assert_eq!(
                    preset.auth_scheme,
                    AuthScheme::Bearer,
                    "Provider {} should use bearer auth",
                    preset.name
                );
            }
        }
    }
}
