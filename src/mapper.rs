//! Structured guide record to flat value map.

use crate::value::{FieldValue, Row, ValueMap};
use serde::{Deserialize, Serialize};

pub const MAX_DIAGNOSES: usize = 4;
pub const MAX_PROCEDURES: usize = 5;
pub const MAX_PROSTHETIC_ITEMS: usize = 5;

const DIAGNOSIS_KEYS: [&str; MAX_DIAGNOSES] =
    ["30cid10principal", "31cid102", "32cid103", "33cid104"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Diagnosis {
    pub id: String,
    pub codigo: String,
    pub descricao: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Procedure {
    pub id: String,
    pub tabela: String,
    pub codigo: String,
    pub descricao: String,
    pub quantidade: f64,
    pub quantidade_autorizada: f64,
}

/// Orthosis, prosthesis or special material line item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProstheticItem {
    pub id: String,
    pub tabela: String,
    pub codigo: String,
    pub descricao: String,
    pub quantidade: f64,
    pub fabricante: String,
    pub valor_unitario: f64,
}

/// Hospitalization pre-authorization request as captured by the entry forms.
/// Every property is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuideData {
    #[serde(rename = "registroANS")]
    pub registro_ans: String,
    pub guia_no_prestador: String,
    pub numero_guia_atribuido_operadora: String,
    pub data_autorizacao: String,
    pub senha: String,
    pub data_validade_senha: String,
    pub data_emissao_guia: String,

    pub numero_carteira: String,
    pub validade_carteira: String,
    #[serde(rename = "atendimentoRN")]
    pub atendimento_rn: String,
    pub nome_beneficiario: String,
    pub nome_social: String,
    pub numero_cartao_nacional_saude: String,

    pub codigo_operadora: String,
    pub nome_contratado: String,
    pub nome_profissional_solicitante: String,
    pub conselho_profissional: String,
    pub numero_conselho: String,
    pub uf_conselho: String,
    #[serde(rename = "codigoCBO")]
    pub codigo_cbo: String,

    #[serde(rename = "codigoOperadoraCNPJ")]
    pub codigo_operadora_cnpj: String,
    pub nome_prestador: String,
    pub nome_hospital_solicitado: String,
    pub data_sugerida_internacao: String,
    pub carater_atendimento: String,
    pub tipo_internacao: String,
    pub regime_internacao: String,
    pub qtde_diarias_solicitadas: Option<FieldValue>,
    #[serde(rename = "previsaoUsoOPME")]
    pub previsao_uso_opme: String,
    pub previsao_uso_quimio: String,
    pub indicacao_clinica: String,

    pub tipo_doenca: String,
    pub tempo_doenca_numero: Option<FieldValue>,
    pub tempo_doenca_unidade: String,
    pub indicacao_acidente: String,
    pub diagnosticos: Vec<Diagnosis>,

    pub procedimento_tabela: String,
    pub procedimentos: Vec<Procedure>,

    pub opm: Vec<ProstheticItem>,

    pub data_provavel_admissao: String,
    pub qtde_diarias_autorizadas: Option<FieldValue>,
    pub tipo_acomodacao_autorizada: String,
    #[serde(rename = "codigoOperadoraCNPJAutorizado")]
    pub codigo_operadora_cnpj_autorizado: String,
    pub nome_hospital_autorizado: String,
    #[serde(rename = "codigoCNES")]
    pub codigo_cnes: String,
    #[serde(rename = "codigoCNESAutorizado")]
    pub codigo_cnes_autorizado: String,
    pub observacao_justificativa: String,

    pub data_solicitacao: String,
    pub assinatura_medico_image: String,
    pub assinatura_beneficiario_image: String,
    pub assinatura_responsavel_image: String,
    pub data_assinatura_responsavel_autorizacao: String,
}

impl GuideData {
    pub fn from_json_str(raw: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Builds the flat map a template's field numbers bind to.
///
/// Two naming schemes are emitted side by side: the TISS field numbers of
/// the standard guide (`10nome`, `351codigoprocedimento1`, ...) and the
/// record's own property names (`nomeBeneficiario`, `procedimentos`, ...),
/// which older per-plan mappings and list/image fields use. Blank values are
/// never inserted. Repeating groups beyond the form's entry limits are dropped.
pub fn flatten(data: &GuideData) -> ValueMap {
    let mut map = ValueMap::new();
    add_source_keys(&mut map, data);
    add_tiss_keys(&mut map, data);
    map
}

fn add_tiss_keys(map: &mut ValueMap, data: &GuideData) {
    let text = |value: &str| Some(FieldValue::from(value));

    map.insert_present("10nome", text(&data.nome_beneficiario));
    map.insert_present(
        "15nomedoprofissionalsolicitante",
        text(&data.nome_profissional_solicitante),
    );
    map.insert_present("16conselhoprofissional", text(&data.conselho_profissional));
    map.insert_present("17numeronoconselho", text(&data.numero_conselho));
    map.insert_present("18uf", text(&data.uf_conselho));
    map.insert_present("21nomedoprestador", text(&data.nome_prestador));
    map.insert_present(
        "25qtdediariassolicitadas",
        data.qtde_diarias_solicitadas.clone(),
    );
    map.insert_present("26indicacaoclinica", text(&data.indicacao_clinica));
    map.insert_present("51observacao", text(&data.observacao_justificativa));
    map.insert_present("52datadeemissao", text(&data.data_emissao_guia));
    map.insert_present("521datamedicosolicitante", text(&data.data_solicitacao));

    map.insert_present("27tipodedoenca", text(&data.tipo_doenca));
    map.insert_present("281tempodedoenca", data.tempo_doenca_numero.clone());
    map.insert_present("282dma", text(&data.tempo_doenca_unidade));
    map.insert_present("23tipodeinternacao", text(&data.tipo_internacao));

    for (key, diagnosis) in DIAGNOSIS_KEYS.iter().zip(&data.diagnosticos) {
        map.insert_present(*key, text(&diagnosis.codigo));
    }

    for (index, procedure) in data.procedimentos.iter().take(MAX_PROCEDURES).enumerate() {
        let i = index + 1;
        map.insert_present(format!("35{i}codigoprocedimento{i}"), text(&procedure.codigo));
        map.insert_present(format!("36{i}descricao{i}"), text(&procedure.descricao));
        if procedure.quantidade > 0.0 {
            map.insert(format!("37{i}qtde{i}"), procedure.quantidade);
        }
    }

    for (index, item) in data.opm.iter().take(MAX_PROSTHETIC_ITEMS).enumerate() {
        let i = index + 1;
        map.insert_present(format!("41{i}descricaoopm{i}"), text(&item.descricao));
        if item.quantidade > 0.0 {
            map.insert(format!("42{i}qtdeopm{i}"), item.quantidade);
        }
    }
}

fn add_source_keys(map: &mut ValueMap, data: &GuideData) {
    let serde_json::Value::Object(fields) = serialize_record(data) else {
        return;
    };
    for (key, value) in fields {
        let limit = match key.as_str() {
            "diagnosticos" => MAX_DIAGNOSES,
            "procedimentos" => MAX_PROCEDURES,
            "opm" => MAX_PROSTHETIC_ITEMS,
            _ => usize::MAX,
        };
        map.insert_present(key, json_to_value(value, limit));
    }
}

fn serialize_record(data: &GuideData) -> serde_json::Value {
    match serde_json::to_value(data) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("guide record could not be serialized for source keys: {err}");
            serde_json::Value::Null
        }
    }
}

fn json_to_value(value: serde_json::Value, row_limit: usize) -> Option<FieldValue> {
    match value {
        serde_json::Value::String(text) => Some(FieldValue::Text(text)),
        serde_json::Value::Number(number) => number.as_f64().map(FieldValue::Number),
        serde_json::Value::Array(items) => {
            let rows: Vec<Row> = items
                .into_iter()
                .take(row_limit)
                .filter_map(json_to_row)
                .collect();
            Some(FieldValue::Rows(rows))
        }
        _ => None,
    }
}

fn json_to_row(value: serde_json::Value) -> Option<Row> {
    let serde_json::Value::Object(fields) = value else {
        return None;
    };
    let row = fields
        .into_iter()
        .filter_map(|(key, value)| {
            json_to_value(value, 0)
                .filter(|v| v.rows().is_none() && !v.is_blank())
                .map(|v| (key, v))
        })
        .collect();
    Some(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GuideData {
        GuideData {
            nome_beneficiario: "Maria Souza".to_string(),
            nome_profissional_solicitante: "Dr. Paulo".to_string(),
            uf_conselho: "  ".to_string(),
            qtde_diarias_solicitadas: Some(FieldValue::from(0)),
            tipo_doenca: "A".to_string(),
            diagnosticos: (0..6)
                .map(|i| Diagnosis {
                    codigo: format!("K{i}"),
                    ..Diagnosis::default()
                })
                .collect(),
            procedimentos: vec![
                Procedure {
                    codigo: "10101012".to_string(),
                    descricao: "Consulta".to_string(),
                    quantidade: 2.0,
                    ..Procedure::default()
                },
                Procedure {
                    codigo: "10101013".to_string(),
                    quantidade: 0.0,
                    ..Procedure::default()
                },
            ],
            opm: vec![ProstheticItem {
                descricao: "Stent".to_string(),
                quantidade: 0.0,
                ..ProstheticItem::default()
            }],
            ..GuideData::default()
        }
    }

    #[test]
    fn scalar_fields_map_to_tiss_numbers() {
        let map = flatten(&sample());
        assert_eq!(map.get("10nome"), Some(&FieldValue::from("Maria Souza")));
        assert_eq!(map.get("nomeBeneficiario"), Some(&FieldValue::from("Maria Souza")));
        assert_eq!(map.get("25qtdediariassolicitadas"), Some(&FieldValue::Number(0.0)));
        assert_eq!(map.get("27tipodedoenca"), Some(&FieldValue::from("A")));
    }

    #[test]
    fn blank_values_are_omitted() {
        let map = flatten(&sample());
        assert!(map.get("18uf").is_none());
        assert!(map.get("ufConselho").is_none());
        assert!(map.get("26indicacaoclinica").is_none());
        assert!(map.iter().all(|(_, value)| !value.is_blank()));
    }

    #[test]
    fn repeating_groups_expand_to_indexed_keys() {
        let map = flatten(&sample());
        assert_eq!(map.get("30cid10principal"), Some(&FieldValue::from("K0")));
        assert_eq!(map.get("33cid104"), Some(&FieldValue::from("K3")));
        assert_eq!(map.get("351codigoprocedimento1"), Some(&FieldValue::from("10101012")));
        assert_eq!(map.get("371qtde1"), Some(&FieldValue::Number(2.0)));
        assert!(map.get("372qtde2").is_none());
        assert_eq!(map.get("411descricaoopm1"), Some(&FieldValue::from("Stent")));
        assert!(map.get("421qtdeopm1").is_none());
    }

    #[test]
    fn row_lists_are_capped_at_entry_limits() {
        let map = flatten(&sample());
        let diagnoses = map.get("diagnosticos").and_then(FieldValue::rows).expect("rows");
        assert_eq!(diagnoses.len(), MAX_DIAGNOSES);
        let procedures = map.get("procedimentos").and_then(FieldValue::rows).expect("rows");
        assert_eq!(procedures.len(), 2);
        assert_eq!(procedures[0].get("quantidade"), Some(&FieldValue::Number(2.0)));
        assert!(procedures[1].get("descricao").is_none());
    }

    #[test]
    fn flatten_is_idempotent() {
        let data = sample();
        assert_eq!(flatten(&data), flatten(&data));
    }

    #[test]
    fn parses_application_record_names() {
        let data = GuideData::from_json_str(
            r#"{"nomeBeneficiario":"Ana","registroANS":"123456","qtdeDiariasSolicitadas":"3",
                "procedimentos":[{"codigo":"1","quantidade":1}]}"#,
        )
        .expect("parse");
        assert_eq!(data.registro_ans, "123456");
        let map = flatten(&data);
        assert_eq!(map.get("registroANS"), Some(&FieldValue::from("123456")));
        assert_eq!(map.get("25qtdediariassolicitadas"), Some(&FieldValue::from("3")));
    }
}
