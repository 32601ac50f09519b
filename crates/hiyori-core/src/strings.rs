use hiyori_types::Locale;

/// User-facing labels for one locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalizedStrings {
    pub page_title: &'static str,
    pub title: &'static str,
    pub tagline: &'static str,
    pub clear: &'static str,
    pub clear_title: &'static str,
    pub send: &'static str,
    pub placeholder: &'static str,
    pub thinking: &'static str,
    pub initial_message: &'static str,
    pub error: &'static str,
}

const JA: LocalizedStrings = LocalizedStrings {
    page_title: "白月日和 AI チャット",
    title: "白月日和 AI チャット",
    tagline: "やさしく、そばにいるよ。",
    clear: "会話をリセット",
    clear_title: "会話をクリアします",
    send: "送信",
    placeholder: "メッセージを入力...",
    thinking: "考え中...",
    initial_message: "こんにちは。白月日和だよ。今日も、ゆっくり話そうね。",
    error: "ごめんね、少し調子がよくないみたい。もう一度試してみてくれる？",
};

const ZH: LocalizedStrings = LocalizedStrings {
    page_title: "白月日和 AI 陪伴聊天",
    title: "白月日和 AI 陪伴聊天",
    tagline: "温柔地，在你身边。",
    clear: "清空对话",
    clear_title: "清空当前对话",
    send: "发送",
    placeholder: "输入消息...",
    thinking: "思考中...",
    initial_message: "你好呀，我是白月日和。今天也请多指教呢。",
    error: "抱歉，刚刚遇到一点小状况，可以再试一次吗？",
};

const EN: LocalizedStrings = LocalizedStrings {
    page_title: "Hiyori AI Chat",
    title: "Hiyori AI Chat",
    tagline: "Gently by your side.",
    clear: "Clear Chat",
    clear_title: "Clear current conversation",
    send: "Send",
    placeholder: "Type a message...",
    thinking: "Thinking...",
    initial_message: "Hello, I'm Hiyori. Let's have a nice chat today.",
    error: "I'm sorry, something felt off. Could we try once more?",
};

pub fn localized_strings(locale: Locale) -> &'static LocalizedStrings {
    match locale {
        Locale::Ja => &JA,
        Locale::Zh => &ZH,
        Locale::En => &EN,
    }
}
