//! User- and admin-facing texts (HTML parse mode).
//!
//! Anything interpolated from user input must go through `escape_html` first;
//! the helpers below do that for their arguments.

use chrono::{DateTime, Local};

use crate::{
    applications::{ApplicationRecord, DecisionKind, Stats},
    domain::Sender,
    formatting::{display_time, escape_html, truncate_text, username_tag},
    teams::TeamCatalog,
};

/// Bot command list shown in the platform menu: (command, description).
pub const BOT_COMMANDS: &[(&str, &str)] = &[
    ("start", "بدء استخدام البوت والتقديم للتيمز"),
    ("menu", "عرض القائمة الرئيسية والخيارات المتاحة"),
    ("cancel", "إلغاء العملية الحالية"),
    ("stats", "إحصائيات التقديمات (للإدارة فقط)"),
    ("clear", "مسح جميع التقديمات (للإدارة فقط)"),
];

pub const WELCOME: &str = "مرحباً بك في بوت التقديم لتيمز Our Goal! 🎯

يسعدنا إنك حابب تكون جزء من فريقنا وتشاركنا في تحقيق النجاح.

اختار التيم اللي حابب تنضم له من الأزرار اللي تحت:

💡 <b>نصيحة:</b> يمكنك استخدام /menu لعرض القائمة الرئيسية في أي وقت
ولو عندك استفسار أو اقتراح، ابعت رسالتك هنا وهيتم الرد عليك في أقرب وقت 🫡";

pub const MENU: &str = "📋 <b>القائمة الرئيسية - Our Goal Bot</b>

🎯 <b>الخيارات المتاحة:</b>

• /start - بدء التقديم للتيمز
• /cancel - إلغاء العملية الحالية
• /stats - إحصائيات التقديمات (للإدارة فقط)

💡 <b>كيفية الاستخدام:</b>
1. اضغط على /start للبدء
2. اختر التيم المناسب
3. اجب على الأسئلة المطلوبة
4. سيتم إرسال طلبك للإدارة

💬 أي رسالة تانية هتوصل للإدارة مباشرة وهيتم الرد عليك هنا.

🔄 يمكنك الضغط على /start في أي وقت للتقديم على تيم جديد";

pub const CANCELLED: &str = "تم إلغاء طلب التقديم.

يمكنك الضغط على /start للبدء من جديد.";

pub const UNKNOWN_COMMAND: &str = "مرحبا بك في Our Goal! 🎯

يمكنك الضغط على /start للبدء من جديد أو /menu لعرض القائمة الرئيسية.";

pub const ADMIN_ONLY: &str = "معذرة، الأمر دا مخصص للادمن بس.";

pub const NO_APPLICATIONS_YET: &str = "لسه مفيش طلبات تقديم.";

pub const CLEARED: &str = "🗑️ <b>تم مسح جميع التقديمات بنجاح!</b>

✅ تم مسح جميع التقديمات والبيانات
✅ يمكن للمستخدمين الآن التقديم مرة أخرى
✅ تم إعادة تصفير الإحصائيات

📊 <b>للتأكد من المسح، يمكنك استخدام الأمر /stats</b>";

pub const CLEAR_FAILED: &str = "❌ حدث خطأ أثناء مسح التقديمات";

pub const TEXT_ANSWER_REQUIRED: &str = "من فضلك اكتب إجابتك كرسالة نصية 📝

أو اضغط /cancel لإلغاء التقديم.";

// ============== Relay ==============

pub const RECEIVED: &str = "تم استلام رسالتك وسيتم الرد عليك في أقرب وقت ✅";
pub const SEND_FAILED: &str = "❌ حدث خطأ في إرسال رسالتك";
pub const REPLY_RECEIVED: &str = "✅ تم إرسال ردك للمشرفين";
pub const REPLY_FAILED: &str = "❌ حدث خطأ في إرسال ردك";
pub const REPLY_TARGET_NOT_FOUND: &str =
    "⚠️ المستخدم رد على رسالة غير معروفة (ربما قبل إعادة تشغيل البوت)، فتم إرسالها كرسالة جديدة";
pub const ORIGIN_NOT_FOUND: &str = "❌ لا يمكن العثور على المستخدم الأصلي لهذه الرسالة";
pub const ADMIN_REPLY_SENT: &str = "✅ تم إرسال الرد بنجاح";
pub const ADMIN_REPLY_HEADER: &str = "📩 <b>رد من فريق Our Goal:</b>";
pub const SENT_REACTION: &str = "✅";

pub fn user_reply_header(sender: &Sender) -> String {
    format!(
        "<b>رد من المستخدم {}</b> {}:",
        escape_html(&sender.full_name()),
        username_tag(sender)
    )
}

pub fn admin_delivery_failed(error: &str) -> String {
    format!("❌ فشل إرسال الرد: {}", escape_html(error))
}

pub fn session_opened(user: &str, admin_name: &str) -> String {
    format!(
        "💬 <b>تم فتح محادثة مع المستخدم</b> {}\n👤 <b>المسؤول:</b> {}\n\nرسائل المستخدم القادمة هتوصل كرد على آخر رسالة منك.",
        escape_html(user),
        escape_html(admin_name)
    )
}

pub const END_CHAT_LABEL: &str = "🔚 إنهاء المحادثة";

pub fn chat_ended_for_user(admin_name: &str, at: DateTime<Local>) -> String {
    format!(
        "🔚 <b>تم إنهاء المحادثة</b>

تم إنهاء المحادثة من قبل الإدارة.

شكراً لك على تواصلك معنا! 🙏

---
🛑 <b>تم الإنهاء بواسطة:</b> {}
📅 <b>وقت الإنهاء:</b> {}",
        escape_html(admin_name),
        display_time(at)
    )
}

pub fn chat_ended_annotation(admin_name: &str) -> String {
    format!("🔚 تم إنهاء المحادثة بواسطة {}", escape_html(admin_name))
}

pub const CHAT_NOT_OPEN: &str = "المحادثة منتهية بالفعل";

// ============== Applications ==============

pub fn team_selected(team_name: &str) -> String {
    let team = escape_html(team_name);
    format!(
        "ممتاز! اختارك لـ {team} 👏

عشان نقدر نقيم طلبك بشكل أفضل، محتاجين نسألك كام سؤال:

السؤال الأول: ليه عايز تنضم لـ {team}؟
إيه اللي خلاك تختار التيم دا تحديداً؟

أكتب إجابتك بكل صراحة وصدق 😊"
    )
}

pub fn experience_question(team_name: &str) -> String {
    format!(
        "شكراً لإجابتك! 🙏

السؤال التاني: عندك أي خبرة أو مهارات متعلقة بشغل {}؟

لو عندك خبرة، اكتب عنها بالتفصيل.
لو مش عندك خبرة، متقلقش وقول كدا عادي - الأهم هو الحماس والاستعداد للتعلم! 💪",
        escape_html(team_name)
    )
}

pub fn application_submitted(team_name: &str) -> String {
    format!(
        "تم تسليم طلبك بنجاح! 🎉

شكراً ليك على اهتمامك بالانضمام لـ {}.
هيتم مراجعة طلبك وهنرد عليك قريباً إن شاء الله.

نتمنى نشوفك معانا في التيم! 🤝

يمكنك الضغط على /start للتقديم على تيم تاني لو عايز.",
        escape_html(team_name)
    )
}

pub fn already_applied(team_name: &str) -> String {
    format!(
        "أنت قدمت على {} قبل كدا! 😊

يمكنك الضغط على /start لتقديم على تيم تاني.",
        escape_html(team_name)
    )
}

pub const UNKNOWN_TEAM: &str = "التيم دا مش موجود. اضغط /start واختار من الأزرار.";

/// `answer_limit` caps each free-text answer, in characters, before escaping.
pub fn application_notification(record: &ApplicationRecord, answer_limit: usize) -> String {
    let a = &record.applicant;
    format!(
        "🆕 طلب تقديم جديد!

👤 <b>المتقدم:</b> {} {}
🆔 <b>معرف المستخدم:</b> {}
🎯 <b>التيم:</b> {}

❓ <b>سبب الانضمام:</b>
{}

💼 <b>الخبرة:</b>
{}

📅 <b>وقت التقديم:</b> {}

💬 <b>للرد على المتقدم:</b> رد على هذه الرسالة وسيتم إرسال ردك إليه تلقائياً",
        escape_html(&a.full_name()),
        username_tag(a),
        a.user_id,
        escape_html(&record.team_name),
        escape_html(&truncate_text(&record.reason, answer_limit)),
        escape_html(&truncate_text(&record.experience, answer_limit)),
        display_time(record.timestamp)
    )
}

pub const FULL_REASON_HEADER: &str = "❓ <b>سبب الانضمام (النص الكامل):</b>\n";
pub const FULL_EXPERIENCE_HEADER: &str = "💼 <b>الخبرة (النص الكامل):</b>\n";

pub const ACCEPT_LABEL: &str = "✅ قبول";
pub const REJECT_LABEL: &str = "❌ رفض";

pub fn decision_for_applicant(
    kind: DecisionKind,
    team_name: &str,
    admin_name: &str,
    at: DateTime<Local>,
) -> String {
    let team = escape_html(team_name);
    let admin = escape_html(admin_name);
    let at = display_time(at);
    match kind {
        DecisionKind::Accepted => format!(
            "🎉 <b>تهانينا! تم قبول طلبك</b>

مرحباً بك في {team}! 🎯

تم قبول طلبك للانضمام لفريقنا. نحن متحمسون لوجودك معنا!

سيتم التواصل معك قريباً من قبل مسؤول الفريق لإعطائك التفاصيل والخطوات التالية.

نتطلع للعمل معك! 🤝

---
✅ <b>تم الموافقة بواسطة:</b> {admin}
📅 <b>تاريخ القبول:</b> {at}"
        ),
        DecisionKind::Rejected => format!(
            "📝 <b>شكراً لك على اهتمامك</b>

نشكرك على تقديمك للانضمام لـ {team}.

للأسف، لم نتمكن من قبول طلبك في الوقت الحالي. هذا لا يعني أن طلبك لم يكن جيداً، لكن لدينا عدد محدود من الأماكن المتاحة.

نشجعك على المحاولة مرة أخرى في المستقبل أو التقديم لفريق آخر.

شكراً لك مرة أخرى! 🙏

---
❌ <b>تم الرفض بواسطة:</b> {admin}
📅 <b>تاريخ الرد:</b> {at}"
        ),
    }
}

pub fn decision_annotation(kind: DecisionKind, admin_name: &str) -> String {
    let admin = escape_html(admin_name);
    match kind {
        DecisionKind::Accepted => {
            format!("✅ تم قبول المتقدم وإرسال رسالة التهنئة ({admin})")
        }
        DecisionKind::Rejected => format!("❌ تم رفض المتقدم وإرسال رسالة مهذبة ({admin})"),
    }
}

pub const DECISION_NOT_DELIVERED: &str = "⚠️ تعذر إرسال الرسالة للمتقدم";
pub const ALREADY_DECIDED: &str = "تم اتخاذ قرار في هذا الطلب بالفعل";
pub const APPLICATION_NOT_FOUND: &str = "لم يتم العثور على هذا الطلب";
pub const INVALID_ACTION: &str = "إجراء غير صالح";

/// Original message text with an extra line appended (buttons are dropped by the edit).
pub fn annotate(original_text: Option<&str>, line: &str) -> String {
    match original_text {
        Some(t) if !t.trim().is_empty() => format!("{}\n\n{line}", escape_html(t)),
        _ => line.to_string(),
    }
}

// ============== Stats ==============

pub fn stats_report(
    stats: &Stats,
    teams: &TeamCatalog,
    active_sessions: usize,
    relay_links: usize,
) -> String {
    let mut out = format!(
        "📊 <b>إحصائيات طلبات التقديم</b>

إجمالي الطلبات: {}
عدد المتقدمين: {}
⏳ قيد المراجعة: {} | ✅ مقبول: {} | ❌ مرفوض: {}

<b>التفاصيل حسب التيم:</b>
",
        stats.total_applications,
        stats.total_applicants,
        stats.pending,
        stats.accepted,
        stats.rejected
    );

    for (id, name) in teams.iter() {
        let count = stats.team_counts.get(id).copied().unwrap_or(0);
        if count > 0 {
            out.push_str(&format!("🔹 {}: {count} طلب\n", escape_html(name)));
        }
    }
    // Applications for teams that were removed from the catalogue.
    for (id, count) in &stats.team_counts {
        if !teams.contains(id) {
            out.push_str(&format!("🔸 {}: {count} طلب\n", escape_html(id.as_str())));
        }
    }

    out.push_str(&format!(
        "
👥 <b>إجمالي المستخدمين:</b> {}
💬 <b>إجمالي الرسائل:</b> {}
🗨️ <b>محادثات مفتوحة:</b> {active_sessions}
🔗 <b>رسائل مربوطة:</b> {relay_links}
",
        stats.total_users, stats.total_messages
    ));

    if !stats.recent_users.is_empty() {
        out.push_str("\n<b>آخر المستخدمين النشطين:</b>\n");
        for (i, (_, user)) in stats.recent_users.iter().enumerate() {
            let username = user
                .username
                .as_deref()
                .filter(|u| !u.is_empty())
                .map(|u| format!(" (@{})", escape_html(u)))
                .unwrap_or_default();
            out.push_str(&format!(
                "{}. {}{username} - {} رسالة - آخر نشاط: {}\n",
                i + 1,
                escape_html(&user.first_name),
                user.message_count,
                display_time(user.last_active)
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::TeamId, testing::sender};

    #[test]
    fn notification_escapes_user_input() {
        let record = ApplicationRecord {
            applicant: sender(1),
            team_id: TeamId::new("team_exams"),
            team_name: "تيم الاختبارات".to_string(),
            reason: "<script>".to_string(),
            experience: "a & b".to_string(),
            timestamp: Local::now(),
            decision: None,
        };
        let html = application_notification(&record, usize::MAX);
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("a &amp; b"));
        assert!(html.contains("(@user1)"));
    }

    #[test]
    fn notification_clips_long_answers() {
        let record = ApplicationRecord {
            applicant: sender(1),
            team_id: TeamId::new("team_exams"),
            team_name: "تيم الاختبارات".to_string(),
            reason: "x".repeat(50),
            experience: "short".to_string(),
            timestamp: Local::now(),
            decision: None,
        };
        let html = application_notification(&record, 10);
        assert!(html.contains(&format!("{}...", "x".repeat(10))));
        assert!(!html.contains(&"x".repeat(11)));
        assert!(html.contains("short"));
    }

    #[test]
    fn annotate_appends_line() {
        assert_eq!(annotate(Some("a<b"), "done"), "a&lt;b\n\ndone");
        assert_eq!(annotate(None, "done"), "done");
    }

    #[test]
    fn stats_report_lists_teams_in_catalogue_order() {
        let mut stats = Stats {
            total_applications: 3,
            total_applicants: 2,
            ..Stats::default()
        };
        stats.team_counts.insert(TeamId::new("team_social"), 1);
        stats.team_counts.insert(TeamId::new("team_exams"), 2);
        let report = stats_report(&stats, &TeamCatalog::default(), 1, 4);
        let exams = report.find("تيم الاختبارات").unwrap();
        let social = report.find("تيم السوشيال").unwrap();
        assert!(exams < social);
        assert!(!report.contains("تيم الدعم الفني"));
        assert!(report.contains("إجمالي الطلبات: 3"));
    }
}
