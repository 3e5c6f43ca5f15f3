//! Lesson-plan generation boundary.
//!
//! The remote completion service sits behind [`PlanGenerator`]. The bundled
//! [`TemplatePlanGenerator`] works offline from grade and strategy tables and
//! emits the same markdown shape the exporters consume.

use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Language {
    English,
    Arabic,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Arabic => "Arabic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "english" | "en" => Some(Self::English),
            "arabic" | "ar" => Some(Self::Arabic),
            _ => None,
        }
    }

    pub fn is_rtl(self) -> bool {
        matches!(self, Self::Arabic)
    }
}

pub struct GradeInfo {
    pub code: &'static str,
    pub label_en: &'static str,
    pub label_ar: &'static str,
    pub verbs: [&'static str; 3],
    pub complexity: &'static str,
    pub duration: &'static str,
}

pub struct StrategyInfo {
    pub code: &'static str,
    pub label_en: &'static str,
    pub label_ar: &'static str,
    pub description: &'static str,
    pub activities: [&'static str; 3],
    pub assessment: [&'static str; 3],
}

pub const GRADES: &[GradeInfo] = &[
    GradeInfo {
        code: "K",
        label_en: "Kindergarten",
        label_ar: "الروضة",
        verbs: ["identify", "match", "describe"],
        complexity: "simple",
        duration: "15-20 minutes",
    },
    GradeInfo {
        code: "1",
        label_en: "1st Grade",
        label_ar: "الصف الأول",
        verbs: ["count", "compare", "explain"],
        complexity: "simple",
        duration: "20-25 minutes",
    },
    GradeInfo {
        code: "2",
        label_en: "2nd Grade",
        label_ar: "الصف الثاني",
        verbs: ["summarize", "predict", "illustrate"],
        complexity: "foundational",
        duration: "25-30 minutes",
    },
    GradeInfo {
        code: "3",
        label_en: "3rd Grade",
        label_ar: "الصف الثالث",
        verbs: ["infer", "estimate", "categorize"],
        complexity: "developing",
        duration: "30-35 minutes",
    },
    GradeInfo {
        code: "4",
        label_en: "4th Grade",
        label_ar: "الصف الرابع",
        verbs: ["distinguish", "interpret", "organize"],
        complexity: "intermediate",
        duration: "35-40 minutes",
    },
    GradeInfo {
        code: "5",
        label_en: "5th Grade",
        label_ar: "الصف الخامس",
        verbs: ["investigate", "design", "justify"],
        complexity: "intermediate",
        duration: "40-45 minutes",
    },
    GradeInfo {
        code: "6",
        label_en: "6th Grade",
        label_ar: "الصف السادس",
        verbs: ["hypothesize", "calculate", "differentiate"],
        complexity: "advanced",
        duration: "45-50 minutes",
    },
    GradeInfo {
        code: "7",
        label_en: "7th Grade",
        label_ar: "الصف السابع",
        verbs: ["evaluate", "formulate", "synthesize"],
        complexity: "advanced",
        duration: "45-50 minutes",
    },
    GradeInfo {
        code: "8",
        label_en: "8th Grade",
        label_ar: "الصف الثامن",
        verbs: ["critique", "defend", "elaborate"],
        complexity: "advanced",
        duration: "50-55 minutes",
    },
    GradeInfo {
        code: "9",
        label_en: "9th Grade",
        label_ar: "الصف التاسع",
        verbs: ["analyze", "argue", "develop"],
        complexity: "high school",
        duration: "55-60 minutes",
    },
    GradeInfo {
        code: "10",
        label_en: "10th Grade",
        label_ar: "الصف العاشر",
        verbs: ["theorize", "validate", "deconstruct"],
        complexity: "high school",
        duration: "55-60 minutes",
    },
    GradeInfo {
        code: "11",
        label_en: "11th Grade",
        label_ar: "الصف الحادي عشر",
        verbs: ["hypothesize", "interpret", "critique"],
        complexity: "high school",
        duration: "55-60 minutes",
    },
    GradeInfo {
        code: "12",
        label_en: "12th Grade",
        label_ar: "الصف الثاني عشر",
        verbs: ["integrate", "evaluate", "innovate"],
        complexity: "high school",
        duration: "55-60 minutes",
    },
];

pub const STRATEGIES: &[StrategyInfo] = &[
    StrategyInfo {
        code: "cooperative_learning",
        label_en: "Cooperative Learning",
        label_ar: "التعلم التعاوني",
        description: "Students work in groups to complete tasks collectively toward academic goals",
        activities: [
            "Think-Pair-Share: students think individually, discuss with a partner, then share with the class",
            "Jigsaw: students become experts on one part of the content then teach others",
            "Numbered Heads Together: groups agree on an answer, then one member is called on",
        ],
        assessment: [
            "Group presentation rubric",
            "Peer evaluation form",
            "Individual accountability check",
        ],
    },
    StrategyInfo {
        code: "brainstorming",
        label_en: "Brainstorming",
        label_ar: "العصف الذهني",
        description: "Students generate a large number of ideas without judgment or criticism",
        activities: [
            "Mind mapping: build a visual map of related ideas",
            "Round-robin brainstorming: each student contributes one idea at a time",
            "Silent brainstorming: write ideas on sticky notes, then cluster them",
        ],
        assessment: [
            "Quantity and relevance of ideas",
            "Participation level",
            "Reflection on the process",
        ],
    },
    StrategyInfo {
        code: "discovery_learning",
        label_en: "Discovery Learning",
        label_ar: "التعلم بالاكتشاف",
        description: "Students discover facts and relationships for themselves through exploration",
        activities: [
            "Guided inquiry: explore materials with teacher facilitation",
            "Simulation: model a real-world scenario",
            "Exploratory experiment: test a hypothesis with minimal guidance",
        ],
        assessment: [
            "Process journal",
            "Concept explanation interview",
            "Application to a new context",
        ],
    },
    StrategyInfo {
        code: "direct_instruction",
        label_en: "Direct Instruction",
        label_ar: "التعليم المباشر",
        description: "Teacher-led explicit instruction with clear explanations and demonstrations",
        activities: [
            "Interactive lecture with visual aids",
            "Step-by-step modeling of the procedure",
            "Guided practice with immediate feedback",
        ],
        assessment: ["Exit ticket", "Quick quiz", "Application exercise"],
    },
    StrategyInfo {
        code: "project_based",
        label_en: "Project-Based Learning",
        label_ar: "التعلم القائم على المشاريع",
        description: "Students work on complex projects over extended time periods",
        activities: [
            "Driving question exploration",
            "Research and information gathering",
            "Public presentation of the final work",
        ],
        assessment: ["Project rubric", "Progress check-ins", "Self and peer evaluation"],
    },
    StrategyInfo {
        code: "flipped_classroom",
        label_en: "Flipped Classroom",
        label_ar: "الفصل المقلوب",
        description: "Students gain first exposure to content at home and practice in class",
        activities: [
            "Pre-recorded instructional video at home",
            "In-class problem-solving workshop",
            "Teacher-guided practice session",
        ],
        assessment: [
            "Pre-class content check",
            "In-class participation",
            "Individual mastery check",
        ],
    },
    StrategyInfo {
        code: "inquiry_based",
        label_en: "Inquiry-Based Learning",
        label_ar: "التعلم القائم على الاستقصاء",
        description: "Learning driven by student questions, ideas, and analyses",
        activities: [
            "Question formulation",
            "Data collection and analysis",
            "Communicating findings",
        ],
        assessment: ["Question quality rubric", "Evidence-based conclusion", "Self-reflection"],
    },
    StrategyInfo {
        code: "differentiated_instruction",
        label_en: "Differentiated Instruction",
        label_ar: "التعليم المتمايز",
        description: "Tailoring instruction to meet individual student needs",
        activities: [
            "Tiered assignments based on readiness",
            "Learning stations with varied approaches",
            "Choice board offering multiple paths",
        ],
        assessment: ["Pre-assessment", "Portfolio review", "Growth-focused assessment"],
    },
    StrategyInfo {
        code: "game_based",
        label_en: "Game-Based Learning",
        label_ar: "التعلم القائم على اللعب",
        description: "Using games to engage students in learning content and skills",
        activities: [
            "Strategy board game for content review",
            "Role-playing scenario",
            "Competitive review round",
        ],
        assessment: ["Game performance", "Content knowledge quiz", "Reflection on gameplay"],
    },
];

pub fn grade(code: &str) -> Option<&'static GradeInfo> {
    let code = code.trim();
    GRADES.iter().find(|g| g.code.eq_ignore_ascii_case(code))
}

pub fn strategy(code: &str) -> Option<&'static StrategyInfo> {
    let code = code.trim();
    STRATEGIES.iter().find(|s| s.code == code)
}

/// "project_based" -> "Project Based"
pub fn humanize_code(code: &str) -> String {
    code.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn catalog_json() -> Value {
    json!({
        "grades": GRADES.iter().map(|g| json!({
            "code": g.code,
            "labelEn": g.label_en,
            "labelAr": g.label_ar,
        })).collect::<Vec<_>>(),
        "strategies": STRATEGIES.iter().map(|s| json!({
            "code": s.code,
            "labelEn": s.label_en,
            "labelAr": s.label_ar,
            "description": s.description,
        })).collect::<Vec<_>>(),
        "languages": [Language::English.as_str(), Language::Arabic.as_str()],
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    pub grade_level: String,
    pub topic: String,
    pub teaching_strategy: String,
    pub language: Language,
}

pub const TOPIC_LEN: std::ops::RangeInclusive<usize> = 3..=200;

impl PlanRequest {
    /// Validates the raw parameters against the catalog.
    pub fn new(
        grade_level: &str,
        topic: &str,
        teaching_strategy: &str,
        language: &str,
    ) -> Result<Self, String> {
        let g = grade(grade_level).ok_or_else(|| format!("unknown gradeLevel: {}", grade_level))?;
        let s = strategy(teaching_strategy)
            .ok_or_else(|| format!("unknown teachingStrategy: {}", teaching_strategy))?;
        let language =
            Language::parse(language).ok_or_else(|| format!("unknown language: {}", language))?;
        let topic = topic.trim();
        if !TOPIC_LEN.contains(&topic.chars().count()) {
            return Err(format!(
                "topic must be {}-{} characters",
                TOPIC_LEN.start(),
                TOPIC_LEN.end()
            ));
        }
        Ok(Self {
            grade_level: g.code.to_string(),
            topic: topic.to_string(),
            teaching_strategy: s.code.to_string(),
            language,
        })
    }
}

/// The prompt sent to the completion service, stored alongside the plan.
pub fn prompt_text(req: &PlanRequest) -> String {
    format!(
        "Create an engaging and detailed lesson plan in {} for grade {} on the topic {}, using the strategy {}. \
         Make sure the plan includes clear learning objectives, interactive activities, and effective ways to assess student understanding.",
        req.language.as_str(),
        req.grade_level,
        req.topic,
        req.teaching_strategy
    )
}

pub trait PlanGenerator {
    fn name(&self) -> &'static str;
    fn generate(&self, req: &PlanRequest) -> anyhow::Result<String>;
}

struct SectionLabels {
    title: &'static str,
    grade: &'static str,
    topic: &'static str,
    strategy: &'static str,
    duration: &'static str,
    objectives: &'static str,
    introduction: &'static str,
    activities: &'static str,
    assessment: &'static str,
    conclusion: &'static str,
}

const LABELS_EN: SectionLabels = SectionLabels {
    title: "Lesson Plan",
    grade: "Grade Level",
    topic: "Topic",
    strategy: "Teaching Strategy",
    duration: "Duration",
    objectives: "Objectives",
    introduction: "Introduction",
    activities: "Main Activities",
    assessment: "Assessment",
    conclusion: "Conclusion",
};

const LABELS_AR: SectionLabels = SectionLabels {
    title: "خطة الدرس",
    grade: "المستوى الدراسي",
    topic: "الموضوع",
    strategy: "استراتيجية التدريس",
    duration: "المدة",
    objectives: "الأهداف",
    introduction: "المقدمة",
    activities: "الأنشطة الرئيسية",
    assessment: "التقييم",
    conclusion: "الخاتمة",
};

/// Offline generator. Section headings follow the request language; activity
/// and assessment text comes from the English strategy tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplatePlanGenerator;

impl PlanGenerator for TemplatePlanGenerator {
    fn name(&self) -> &'static str {
        "template"
    }

    fn generate(&self, req: &PlanRequest) -> anyhow::Result<String> {
        let g = grade(&req.grade_level)
            .ok_or_else(|| anyhow::anyhow!("unknown grade {}", req.grade_level))?;
        let s = strategy(&req.teaching_strategy)
            .ok_or_else(|| anyhow::anyhow!("unknown strategy {}", req.teaching_strategy))?;
        let (labels, grade_label, strategy_label) = match req.language {
            Language::English => (&LABELS_EN, g.label_en, s.label_en),
            Language::Arabic => (&LABELS_AR, g.label_ar, s.label_ar),
        };
        let topic = &req.topic;

        let mut out = String::new();
        out.push_str(&format!("# {}: {}\n\n", labels.title, topic));
        out.push_str(&format!("**{}:** {}\n", labels.grade, grade_label));
        out.push_str(&format!("**{}:** {}\n", labels.topic, topic));
        out.push_str(&format!("**{}:** {}\n", labels.strategy, strategy_label));
        out.push_str(&format!("**{}:** {}\n\n", labels.duration, g.duration));

        out.push_str(&format!("## {}\n", labels.objectives));
        for verb in g.verbs {
            out.push_str(&format!("• Students will {} key ideas of {}\n", verb, topic));
        }
        out.push('\n');

        out.push_str(&format!("## {}\n", labels.introduction));
        out.push_str(&format!(
            "• Open with a short question connecting {} to students' daily life\n",
            topic
        ));
        out.push_str(&format!(
            "• Introduce the {} approach: {}\n\n",
            s.label_en.to_lowercase(),
            s.description.to_lowercase()
        ));

        out.push_str(&format!("## {}\n", labels.activities));
        for activity in s.activities {
            out.push_str(&format!("• {}\n", activity));
        }
        out.push_str(&format!(
            "• Keep tasks at a {} level of complexity\n\n",
            g.complexity
        ));

        out.push_str(&format!("## {}\n", labels.assessment));
        for item in s.assessment {
            out.push_str(&format!("• {}\n", item));
        }
        out.push('\n');

        out.push_str(&format!("## {}\n", labels.conclusion));
        out.push_str(&format!(
            "• Summarize the main ideas of {} with the class\n",
            topic
        ));
        out.push_str("• Assign a short reflection for the next lesson\n");
        Ok(out)
    }
}
