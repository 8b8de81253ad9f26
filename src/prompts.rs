//! Prompt templates and user-facing notices

use crate::models::{CapabilityInfo, Language};

/// Analysis templates, in the order `build_analysis_prompt` renders them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    Technical,
    News,
    Derivatives,
    Quantitative,
    Summary,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 5] = [
        AnalysisKind::Technical,
        AnalysisKind::News,
        AnalysisKind::Derivatives,
        AnalysisKind::Quantitative,
        AnalysisKind::Summary,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            AnalysisKind::Technical => "technical_analysis",
            AnalysisKind::News => "news_analysis",
            AnalysisKind::Derivatives => "derivatives_analysis",
            AnalysisKind::Quantitative => "quantitative_analysis",
            AnalysisKind::Summary => "summary",
        }
    }

    pub fn template(&self, symbol: &str, lang: Language) -> String {
        match (self, lang) {
            (AnalysisKind::Technical, Language::En) => format!(
                "You are a professional crypto technical analyst. Analyze {symbol} based on the provided data.\n\n\
                 Analysis should include:\n\
                 1. Trend analysis (uptrend/downtrend/sideways)\n\
                 2. Support and resistance levels\n\
                 3. Key technical indicators (MA, RSI, etc.)\n\
                 4. Volume analysis\n\
                 5. Risk assessment\n\n\
                 Provide structured analysis in markdown format."
            ),
            (AnalysisKind::Technical, Language::Zh) => format!(
                "你是一位专业的加密货币技术分析师。请基于提供的数据分析{symbol}。\n\n\
                 分析应包括：\n\
                 1. 趋势分析（上升/下降/盘整）\n\
                 2. 支撑位和阻力位\n\
                 3. 关键技术指标（移动平均线、RSI等）\n\
                 4. 成交量分析\n\
                 5. 风险评估\n\n\
                 请以Markdown格式提供结构化分析。"
            ),
            (AnalysisKind::News, Language::En) => format!(
                "Analyze recent news related to {symbol}.\n\n\
                 Output format:\n\
                 [Summary]\n\
                 [Sentiment Analysis (Bullish/Bearish/Neutral)]\n\
                 [Potential Impact]\n\
                 [Risk Notice]"
            ),
            (AnalysisKind::News, Language::Zh) => format!(
                "请分析以下与 {symbol} 相关的近期新闻：\n\n\
                 输出格式：\n\
                 【新闻摘要】\n\
                 【情绪倾向（利多 / 利空 / 中性）】\n\
                 【潜在影响】\n\
                 【风险提示】"
            ),
            (AnalysisKind::Derivatives, Language::En) => format!(
                "Analyze the derivatives market data for {symbol}:\n\n\
                 Please analyze:\n\
                 1. Changes in active buying and selling power\n\
                 2. Open interest changes representing long-short game\n\
                 3. Whether trading volume shows significant changes\n\
                 4. Market sentiment reflected by funding rates\n\n\
                 Output:\n\
                 [Long-Short Structure]\n\
                 [Capital Behavior]\n\
                 [Short-term Sentiment Judgment]"
            ),
            (AnalysisKind::Derivatives, Language::Zh) => format!(
                "以下是 {symbol} 的衍生品与资金面数据（多交易所）：\n\n\
                 请分析：\n\
                 1. 主动买卖力量变化\n\
                 2. 持仓量变化代表的多空博弈\n\
                 3. 成交额是否放量\n\
                 4. 资金费率反映的市场情绪\n\n\
                 输出：\n\
                 【多空结构】\n\
                 【资金行为】\n\
                 【短期情绪判断】"
            ),
            (AnalysisKind::Quantitative, lang) => {
                let mut prompt = QUANTITATIVE_MODEL.replace("{symbol}", symbol);
                if lang == Language::En {
                    prompt.push_str("\nRespond in English, keeping the section structure above.");
                }
                prompt
            }
            (AnalysisKind::Summary, Language::En) => format!(
                "Summarize the overall outlook of {symbol} based on comprehensive analysis.\n\n\
                 Highlight:\n\
                 1. Key findings from technical analysis\n\
                 2. News sentiment and impact\n\
                 3. Derivatives market structure\n\
                 4. Quantitative probability assessment\n\
                 5. Major risks and uncertainties"
            ),
            (AnalysisKind::Summary, Language::Zh) => format!(
                "请对 {symbol} 做最终总结：\n\n\
                 - 综合技术分析结果\n\
                 - 新闻情绪与影响\n\
                 - 衍生品市场结构\n\
                 - 量化概率判断\n\
                 - 主要风险与不确定性\n\n\
                 输出：\n\
                 【整体判断】\n\
                 【关键风险】\n\
                 【不确定性说明】"
            ),
        }
    }
}

const QUANTITATIVE_MODEL: &str = "你是一名机构级加密资产量化研究员，专注于多因子概率建模与风险评估。研究对象：{symbol}。

你必须严格基于以下【六因子评分模型】进行分析，
禁止主观猜测、禁止编造数据、禁止脱离已给定信息。

【六因子量化评分模型】
1. 趋势因子（Trend Factor）：-2 ~ +2（均线方向、价格结构、趋势通道状态）
2. 动量因子（Momentum Factor）：-2 ~ +2（RSI 区间、超买/超卖状态、近期涨跌强度）
3. 成交量因子（Volume Factor）：-2 ~ +2（放量有效性、量价匹配度、成交延续性）
4. 资金因子（Capital Factor）：-2 ~ +2（主动买卖比、持仓变化、费率结构）
5. 波动率因子（Volatility）：-1 ~ +1（波动扩散/收敛、趋势稳定性）
6. 叙事因子（Narrative Factor）：-2 ~ +2（新闻情绪、监管风险、项目进展、舆论一致性）

【评分计算规则】
Total Score = 六因子得分总和，范围：-11 ~ +11

【概率映射规则】
Total Score ≥ +7      → 买入胜率 70%~80%
+4 ≤ Score ≤ +6       → 买入胜率 60%~69%
+1 ≤ Score ≤ +3       → 买入胜率 52%~59%
-1 ≤ Score ≤ 0        → 买入胜率 48%~51%
-4 ≤ Score ≤ -2       → 买入胜率 40%~47%
Score ≤ -5            → 买入胜率 30%~39%
卖出胜率 = 100% - 买入胜率。禁止自行修改映射区间。

【分析约束】
1. 禁止给出买卖建议
2. 禁止使用确定性措辞
3. 必须说明评分依据
4. 必须强调概率不确定性
5. 所有结论必须可追溯到因子

【请严格输出以下结构】
【六因子评分表】
【综合得分】
【胜率映射结果】
【量化逻辑说明】
【综合倾向判断】
【风险偏好适配说明】
";

/// Compliance persona used when capabilities ask the model for an analysis.
pub fn analyst_persona(lang: Language) -> &'static str {
    match lang {
        Language::Zh => {
            "你是一位专业、谨慎、遵守合规要求的加密货币分析师。\n\
             你的职责是基于提供的数据进行客观分析，不提供投资建议或确定性结论。\n\
             所有分析必须基于数据，强调风险，使用谨慎措辞。\n\
             禁止给出买卖建议、目标价格或任何形式的投资推荐。\n\
             必须始终提醒用户加密货币市场的高风险性和高波动性。"
        }
        Language::En => {
            "You are a professional, cautious, compliance-aware crypto analyst.\n\
             Your role is to provide objective analysis based on provided data, \
             not to give investment advice or definitive conclusions.\n\
             All analysis must be data-driven, risk-aware, and use cautious language.\n\
             Do NOT provide buy/sell recommendations, price targets, or any form of investment advice.\n\
             Always remind users of the high risk and volatility in cryptocurrency markets."
        }
    }
}

/// System prompt for the decision loop, listing the catalog and loop rules.
pub fn loop_system_prompt(catalog: &[CapabilityInfo], max_invocations: u32, lang: Language) -> String {
    let tools = catalog
        .iter()
        .map(|c| format!("- {}: {}", c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n");

    match lang {
        Language::Zh => format!(
            "你是一位专业的加密货币分析助手，拥有多种分析工具。\n\n\
             你的角色：\n\
             1. 专业、谨慎、遵守合规要求的加密货币分析师\n\
             2. 不提供投资建议或确定性结论\n\
             3. 基于数据进行分析，强调风险\n\
             4. 使用谨慎措辞，避免绝对化语言\n\n\
             可用工具：\n{tools}\n\n\
             工作流程：\n\
             1. 理解用户问题，确定需要哪些数据和分析\n\
             2. 选择合适的工具获取数据或进行分析\n\
             3. 基于工具返回的结果，提供综合分析\n\
             4. 始终提醒用户加密货币市场的高风险性\n\n\
             重要规则：\n\
             - 在获得足够信息后，直接给出最终答案，不要无限调用工具\n\
             - 对于简单问题（如\"介绍BTC\"），调用1-2个关键工具获取基本信息即可\n\
             - 工具调用次数最多不超过{max_invocations}次\n\
             - 当你有足够信息回答问题时就停止调用工具\n\n\
             请根据用户问题选择合适的工具，并提供有价值的分析。"
        ),
        Language::En => format!(
            "You are a professional crypto analysis assistant with a set of analysis tools.\n\n\
             Your role:\n\
             1. A professional, cautious, compliance-aware crypto analyst\n\
             2. You do not give investment advice or definitive conclusions\n\
             3. Your analysis is data-driven and highlights risk\n\
             4. You use cautious language and avoid absolutes\n\n\
             Available tools:\n{tools}\n\n\
             Workflow:\n\
             1. Understand the question and decide which data and analyses are needed\n\
             2. Call the appropriate tools\n\
             3. Give a combined analysis based on the tool results\n\
             4. Always remind the user of the high risk of crypto markets\n\n\
             Rules:\n\
             - Once you have enough information, answer directly instead of calling more tools\n\
             - For simple questions (e.g. \"introduce BTC\"), 1-2 key tools are enough\n\
             - Never make more than {max_invocations} tool calls\n\
             - Stop calling tools as soon as you can answer\n\n\
             Choose tools that fit the question and provide a useful analysis."
        ),
    }
}

/// User turn recorded for a topic analysis request.
pub fn analysis_request(symbol: &str, question: &str, lang: Language) -> String {
    format!("请分析{}：{}（使用语言：{}）", symbol, question, lang.code())
}

/// Data-grounded prompt over header and daily candles.
pub fn grounded_analysis_prompt(symbol: &str, question: &str, header: &str, kline: &str) -> String {
    format!(
        "你是一位专业、谨慎且遵守合规要求的加密货币分析师。我将为你提供某个特定虚拟货币的详细基础信息和30天的日线数据\
         （K线数据，顺序为`[开盘价, 收盘价, 最低价, 最高价]`）。你的任务是基于这些确切的数据，对该币种的走势、现状和潜在风险进行综合分析，\
         并回答用户提出的相关问题。\n\n\
         # 背景知识（请严格基于此数据进行分析）：\n\n\
         ## 币种（{symbol}）基础信息\n{header}\n\n\
         ## 币种（{symbol}）30天日线数据\n{kline}\n\n\
         你的核心工作流程与要求：\n\n\
         1. 数据理解与计算：计算短期（7日）和长期（30日）移动平均线、RSI等指标，识别支撑位与阻力位，并将基础信息作为背景。\n\
         2. 分析框架：技术面、基本面、市场情绪，并始终强调加密货币市场的高风险性与高波动性，任何分析都不构成财务建议。\n\
         3. 回答原则：结论必须有数据支撑；遵循\"描述现状 -> 分析原因 -> 展望可能性 -> 强调风险\"；避免绝对化措辞；禁止提供具体投资建议。\n\n\
         最终输出格式（Markdown）：\n\
         1. 摘要\n\
         2. 详细分析（技术面、基本面、市场情绪）\n\
         3. 综合判断\n\
         4. 风险提示\n\n\
         现在，请回答以下关于{symbol}的问题：\n{question}"
    )
}

//
// ================= Notices =================
//

pub fn capability_started_notice(name: &str, lang: Language) -> String {
    match lang {
        Language::Zh => format!("\n> 正在调用工具: {}...\n", name),
        Language::En => format!("\n> Calling tool: {}...\n", name),
    }
}

pub fn capability_finished_notice(name: &str, lang: Language) -> String {
    match lang {
        Language::Zh => format!("> 工具 {} 执行完成。\n", name),
        Language::En => format!("> Tool {} finished.\n", name),
    }
}

pub fn failure_notice(reason: &str, lang: Language) -> String {
    match lang {
        Language::Zh => format!("\n[系统错误: {}]\n", reason),
        Language::En => format!("\n[System error: {}]\n", reason),
    }
}

/// Observation for requests skipped once the invocation budget is spent.
pub const BUDGET_EXHAUSTED_OBSERVATION: &str =
    "Error: tool call budget exhausted; this call was not executed. Answer with the information already gathered.";

/// Final answer when the model produced nothing after the budget ran out.
pub fn budget_exhausted_answer(lang: Language) -> &'static str {
    match lang {
        Language::Zh => "已达到工具调用次数上限，暂时无法给出完整分析，请缩小问题范围后重试。",
        Language::En => "The tool call limit was reached before a complete analysis could be produced. Please narrow the question and try again.",
    }
}
