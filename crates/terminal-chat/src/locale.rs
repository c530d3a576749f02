/// Language of the canned transcript lines the chat appends on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Locale {
    #[default]
    Pt,
    En,
}

impl Locale {
    /// Settings store `pt` / `en`; anything else falls back to Portuguese.
    pub fn from_code(code: &str) -> Self {
        match code.to_ascii_lowercase().as_str() {
            "en" | "en-us" | "en-gb" => Self::En,
            _ => Self::Pt,
        }
    }

    /// Appended to the transcript when a send fails.
    pub fn fallback_error(&self) -> &'static str {
        match self {
            Self::Pt => "Desculpe, ocorreu um erro ao processar sua mensagem.",
            Self::En => "Sorry, something went wrong while processing your message.",
        }
    }

    /// Appended when the backend answered with nothing usable.
    pub fn empty_reply(&self) -> &'static str {
        match self {
            Self::Pt => "Desculpe, não consegui processar sua mensagem.",
            Self::En => "Sorry, I could not process your message.",
        }
    }

    pub fn assistant_system_prompt(&self) -> &'static str {
        match self {
            Self::Pt => {
                "Você é um assistente útil em um sistema de produtividade com estilo terminal minimalista. \
                 Fale em português brasileiro. Forneça respostas diretas e ajuda prática."
            }
            Self::En => {
                "You are a helpful assistant inside a minimalist terminal-style productivity system. \
                 Give direct answers and practical help."
            }
        }
    }

    pub(crate) fn ceo_intro(&self) -> [&'static str; 3] {
        match self {
            Self::Pt => [
                "Estabelecendo conexão segura...",
                "Acesso concedido. Entrando na rede subterrânea...",
                "E aí! Aqui é o Severino, o CEO. Me diz aí o que tu precisa!",
            ],
            Self::En => [
                "Establishing secure connection...",
                "Access granted. Entering the underground network...",
                "Hey! Severino here, the CEO. Tell me what you need!",
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_codes_fall_back_to_portuguese() {
        assert_eq!(Locale::from_code("EN"), Locale::En);
        assert_eq!(Locale::from_code("pt"), Locale::Pt);
        assert_eq!(Locale::from_code("fr"), Locale::Pt);
    }
}
