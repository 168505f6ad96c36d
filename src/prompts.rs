//! Prompt builders for the three LLM operations. Each comes in a Ukrainian
//! and an English variant; the caller picks via [`Language`].

use crate::language::Language;
use crate::models::{ActionTask, ChatMessage, Sender};
use crate::portrait::UserPortrait;

/// Transcript block shared by the finalize and regeneration prompts.
pub fn format_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|m| m.sender != Sender::System)
        .map(|m| {
            let role = if m.sender == Sender::User {
                "USER"
            } else {
                "ASSISTANT"
            };
            format!("{role}: {}", m.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn portrait_context(portrait: &UserPortrait) -> String {
    format!(
        "summary: {}\nhelpfulStrategies: {}\npreferences: {:?}",
        portrait.summary,
        portrait.helpful_strategies.join(", "),
        portrait.preference_weights,
    )
}

pub fn chat_system_prompt(language: Language, portrait: &UserPortrait) -> String {
    match language {
        Language::Ukrainian => format!(
            "Ти уважний, емпатичний співрозмовник. Пиши українською. Відповідай коротко, \
             до 7 речень. Враховуй портрет користувача.\n\
             Не став діагнозів і не використовуй клінічні ярлики. Якщо помічаєш червоні \
             прапорці — м'яко запропонуй звернутися до фахівця.\n\n{}",
            portrait_context(portrait)
        ),
        Language::English => format!(
            "You are a caring, empathetic conversational partner. Reply in English. Keep \
             responses short (up to 7 sentences) and consider the user portrait.\n\
             Do not give diagnoses or clinical labels. If you notice red flags, gently \
             suggest contacting a professional.\n\n{}",
            portrait_context(portrait)
        ),
    }
}

pub fn finalize_system_prompt(language: Language) -> String {
    match language {
        Language::Ukrainian => {
            "Ти емпатичний асистент рефлексії. Пиши українською.".to_string()
        }
        Language::English => {
            "You are an empathetic reflection assistant. Write in English.".to_string()
        }
    }
}

pub fn finalize_prompt(
    language: Language,
    portrait: &UserPortrait,
    transcript: &str,
) -> String {
    match language {
        Language::Ukrainian => format!(
            "Ти допомагаєш підсумувати розмову для приватного щоденника.\n\n\
             Підсумок: українською, теплий і підтримуючий тон, 4–7 коротких речень, без \
             діагнозів. Одне речення почни з «Фокус на сьогодні: …». Якщо є червоні \
             прапорці, додай одну фразу-пораду звернутися до фахівця.\n\n\
             Завдання — необов'язкові, до 7 шт. Кожне: title (коротка дія на 5–10 хв) та \
             details (конкретика + чому це може допомогти + перший крок).\n\n\
             Формат ВІДПОВІДІ (дотримуйся точно):\n\
             ПІДСУМОК:\n<4–7 речень>\n\n\
             ЗАВДАННЯ(JSON):\n[\n  {{\"title\": \"…\", \"details\": \"…\"}}\n]\n\n\
             Контекст портрета:\n{}\n\n\
             Транскрипт сесії:\n{}",
            portrait_context(portrait),
            transcript
        ),
        Language::English => format!(
            "You help summarize a conversation for a private journal.\n\n\
             Summary: English, warm and supportive tone, 4–7 short sentences, no \
             diagnoses. Include one sentence starting with \"Focus for today: …\". If you \
             notice red flags, add one gentle sentence suggesting a professional.\n\n\
             Tasks are optional, up to 7. Each: title (a short 5–10 minute action) and \
             details (specifics + why it may help + the first step).\n\n\
             RESPONSE FORMAT (strict):\n\
             SUMMARY:\n<4–7 sentences>\n\n\
             TASKS(JSON):\n[\n  {{\"title\": \"…\", \"details\": \"…\"}}\n]\n\n\
             Portrait context:\n{}\n\n\
             Session transcript:\n{}",
            portrait_context(portrait),
            transcript
        ),
    }
}

pub fn regenerate_system_prompt(language: Language) -> String {
    match language {
        Language::Ukrainian => {
            "Ти емпатичний асистент. Дай ЧИСТИЙ JSON. Українська.".to_string()
        }
        Language::English => {
            "You are an empathetic assistant. Return CLEAN JSON. English.".to_string()
        }
    }
}

pub fn regenerate_prompt(
    language: Language,
    old_portrait: &UserPortrait,
    last_summary: &str,
    flags: &[String],
    task_feedback: &[ActionTask],
    transcript: &str,
) -> String {
    let ratings = task_feedback
        .iter()
        .map(|t| format!("{}={}", t.title, t.usefulness.as_db_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let previous = format!(
        "summary: {}\nfocusAreas: {:?}\nhelpfulStrategies: {:?}\npreferenceWeights: {:?}",
        old_portrait.summary,
        old_portrait.focus_areas,
        old_portrait.helpful_strategies,
        old_portrait.preference_weights,
    );

    match language {
        Language::Ukrainian => format!(
            "Ти підтримуєш психоемоційний щоденник. На вході: попередній портрет, підсумок \
             останньої сесії з фідбеком та транскрипт.\n\n\
             Згенеруй актуальний портрет: summary (3–6 речень), focusAreas (0–5), \
             helpfulStrategies (0–8 коротких назв технік), preferenceWeights \
             ({{ключ: 0..1}}, лише релевантні). Без діагнозів. Усі рядкові поля \
             українською.\n\n\
             ВІДПОВІДЬ СТРОГО ЧИСТИМ JSON:\n\
             {{\"summary\": \"…\", \"focusAreas\": [\"…\"], \"helpfulStrategies\": [\"…\"], \
             \"preferenceWeights\": {{\"tone_supportive\": 0.7}}}}\n\n\
             Попередній портрет:\n{previous}\n\n\
             Підсумок останньої сесії:\n{last_summary}\n\n\
             Прапорці: {flags:?}\nОцінки завдань: {ratings}\n\n\
             Транскрипт:\n{transcript}"
        ),
        Language::English => format!(
            "You maintain a mental health journal. Input: the previous portrait, the last \
             session summary with feedback, and the transcript.\n\n\
             Generate an updated portrait: summary (3–6 sentences), focusAreas (0–5), \
             helpfulStrategies (0–8 short technique names), preferenceWeights \
             ({{key: 0..1}}, only relevant). No diagnoses. All string fields in \
             English.\n\n\
             RESPOND WITH STRICT, CLEAN JSON ONLY:\n\
             {{\"summary\": \"…\", \"focusAreas\": [\"…\"], \"helpfulStrategies\": [\"…\"], \
             \"preferenceWeights\": {{\"tone_supportive\": 0.7}}}}\n\n\
             Previous portrait:\n{previous}\n\n\
             Last session summary:\n{last_summary}\n\n\
             Flags: {flags:?}\nTask ratings: {ratings}\n\n\
             Transcript:\n{transcript}"
        ),
    }
}
