//! User-facing messages
//!
//! The portal serves Brazilian taxpayers, so everything the user reads is in
//! Portuguese.

pub const CATEGORY_MENU: &str = "Olá! Por qual tipo de dado você gostaria de acessar?\n\
1. Código de Cadastro (IPTU)\n\
2. CPF (Contribuinte)";

pub const PROPERTY_CODE_PROMPT: &str = "Certo! Por favor, informe o Código de Cadastro do imóvel.";

pub const TAX_ID_PROMPT: &str = "Ok! Por favor, informe o número do seu CPF (somente números).";

pub const INVALID_CATEGORY: &str =
    "Opção inválida. Por favor, digite \"1\" para Código de Cadastro ou \"2\" para CPF.";

pub const INVALID_TAX_ID: &str = "CPF inválido. Por favor, digite apenas os 11 números do CPF.";

pub const PROPERTY_LOGIN_OK: &str = "✅ Código de cadastro preenchido no site com sucesso para IPTU! \
Você está logado no ambiente de IPTU.";

pub const PROPERTY_LOGIN_FAILED: &str =
    "❌ Erro ao preencher o código de cadastro no site para IPTU. Por favor, tente novamente.";

pub const TAXPAYER_MENU: &str = "✅ CPF preenchido no site com sucesso para Contribuinte! \
Por favor, escolha uma opção:\n\
1. Débitos em Aberto\n\
2. Certidão Negativa de Débitos";

pub const TAXPAYER_LOGIN_FAILED: &str =
    "❌ Erro ao preencher o CPF no site para Contribuinte. Por favor, tente novamente.";

pub const INVALID_TAXPAYER_ACTION: &str = "Opção inválida. Por favor, digite \"1\" para \
\"Débitos em Aberto\" ou \"2\" para \"Certidão Negativa de Débitos\".";

pub const DEBTS_OPENED: &str = "Abrimos a tela de \"DÉBITOS EM ABERTO\" no portal.";

pub const CERTIFICATE_CAPTION: &str = "Sua certidão negativa de débitos está aqui!";

pub const CERTIFICATE_SENT: &str =
    "✅ Sua certidão negativa de débitos foi gerada e enviada para você!";

pub const CERTIFICATE_NOT_GENERATED: &str =
    "❌ Não foi possível gerar ou encontrar a certidão PDF.";

pub const DELIVERY_FAILED: &str = "❌ Ocorreu um erro ao enviar a certidão pelo WhatsApp.";

pub const ACTION_FAILED: &str =
    "❌ Ocorreu um erro ao tentar acessar a opção. Por favor, tente novamente.";

pub const SESSION_LOST: &str =
    "❌ Parece que a sessão do navegador foi perdida. Por favor, comece novamente.";

pub const POOL_EXHAUSTED: &str =
    "⏳ Muitos atendimentos em andamento no momento. Por favor, tente novamente em alguns minutos.";

pub const BROWSER_UNAVAILABLE: &str =
    "❌ O navegador não pôde ser iniciado no servidor. Por favor, tente novamente mais tarde.";

pub const CANCELLED: &str = "Operação cancelada.";

pub const HELP: &str =
    "Não entendi. Por favor, siga as instruções ou digite \"reset\" para recomeçar.";

pub const RESET_DONE: &str = "Sessão resetada. Por favor, comece novamente.";

pub fn property_code_ack(code: &str) -> String {
    format!("Recebi o código: {code}. Tentando preencher o site para IPTU...")
}

pub fn tax_id_ack(tax_id: &str) -> String {
    format!("Recebi o CPF: {tax_id}. Tentando preencher o site para Contribuinte...")
}

/// Invalid CPF reply, quoting what the user typed when there was something
pub fn invalid_tax_id(echo: Option<&str>) -> String {
    match echo.filter(|value| !value.is_empty()) {
        Some(value) => format!("{INVALID_TAX_ID}\nRecebido: {value}"),
        None => INVALID_TAX_ID.to_string(),
    }
}

pub fn debts_opened(landing_url: Option<&str>) -> String {
    match landing_url {
        Some(url) => format!("{DEBTS_OPENED}\nEndereço: {url}"),
        None => DEBTS_OPENED.to_string(),
    }
}
