//! Built-in workflows for the Corumbá "Serviços Web" portal
//!
//! The portal is a JSF application; element ids are generated by the view
//! and change whenever the municipality redeploys, which is why every
//! selector can be overridden from `config.yaml`.

use super::{Step, Workflow};

const PROPERTY_ENTRY: &str = r"#formHome\:j_idt1062\:0\:j_idt1064";
const PROPERTY_MODAL: &str = r"#compInformarImovel\:j_idt80";
const PROPERTY_INPUT: &str = r"#compInformarImovel\:formNumero\:itIdentText";
const PROPERTY_SUBMIT: &str = r"#compInformarImovel\:formNumero\:btnValidar";

const TAXPAYER_ENTRY: &str = r"#formHome\:j_idt1062\:3\:j_idt1064";
const TAXPAYER_FORM: &str = r"#compInformarContribuinte\:formNumero";
const TAXPAYER_NATURAL_PERSON: &str =
    r"#compInformarContribuinte\:formNumero\:radioCadastroTipoPessoa\:0";
const TAXPAYER_INPUT: &str = r"#compInformarContribuinte\:formNumero\:itIdent";
const TAXPAYER_SUBMIT: &str = r"#compInformarContribuinte\:formNumero\:btnValidar";

const DEBTS_LINK: &str = r"#formContribuinte\:repeat\:0\:clLinkImobiliario";
const CERTIFICATE_LINK: &str = r"#formContribuinte\:repeat\:1\:clLinkImobiliario";
const CERTIFICATE_PRINT: &str = r"#formCertidaoNegativaDebitos\:tabView\:j_idt396\:j_idt443";

fn wait_visible(selector: &str) -> Step {
    Step::WaitFor {
        selector: selector.to_string(),
        visible: true,
    }
}

fn click(selector: &str) -> Step {
    Step::Click {
        selector: selector.to_string(),
    }
}

fn type_input(selector: &str) -> Step {
    Step::Type {
        selector: selector.to_string(),
        text: None,
    }
}

pub fn property_login() -> Workflow {
    Workflow::new(vec![
        Step::OpenPortal,
        Step::WaitFor {
            selector: PROPERTY_ENTRY.to_string(),
            visible: false,
        },
        click(PROPERTY_ENTRY),
        wait_visible(PROPERTY_MODAL),
        wait_visible(PROPERTY_INPUT),
        type_input(PROPERTY_INPUT),
        wait_visible(PROPERTY_SUBMIT),
        click(PROPERTY_SUBMIT),
        Step::WaitForNavigation,
    ])
}

pub fn taxpayer_login() -> Workflow {
    Workflow::new(vec![
        Step::OpenPortal,
        Step::WaitFor {
            selector: TAXPAYER_ENTRY.to_string(),
            visible: false,
        },
        click(TAXPAYER_ENTRY),
        wait_visible(TAXPAYER_FORM),
        Step::EnsureChecked {
            selector: TAXPAYER_NATURAL_PERSON.to_string(),
            settle_ms: 500,
        },
        wait_visible(TAXPAYER_INPUT),
        type_input(TAXPAYER_INPUT),
        wait_visible(TAXPAYER_SUBMIT),
        click(TAXPAYER_SUBMIT),
        Step::WaitForNavigation,
    ])
}

pub fn debts_lookup() -> Workflow {
    Workflow::new(vec![
        wait_visible(DEBTS_LINK),
        click(DEBTS_LINK),
        Step::WaitForNavigation,
    ])
}

pub fn certificate() -> Workflow {
    Workflow::new(vec![
        wait_visible(CERTIFICATE_LINK),
        click(CERTIFICATE_LINK),
        Step::WaitForNavigation,
        wait_visible(CERTIFICATE_PRINT),
        Step::CapturePdf {
            selector: CERTIFICATE_PRINT.to_string(),
        },
    ])
}
