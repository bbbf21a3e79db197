//! Messages sent to post authors. Bodies are Markdown with `{placeholder}`
//! slots filled in at send time.

pub const REMINDER_SUBJECT: &str = "You have not tagged your post.";

const REMINDER_TEMPLATE: &str = "[Your recent post]({post_url}) does not have any flair and will soon be removed.\n\n\
    Please add flair to your post. \
    If you do not add flair within **{removal_window}**, you will have to resubmit your post. \
    Don't know how to flair your post? Click [here](http://imgur.com/a/m3FI3) to view this helpful guide on how to flair your post. \
    If you are using the mobile version of the site click the hamburger menu in the top right of the screen and switch to the desktop site and then follow the instructions as you would on desktop.";

pub const REMOVAL_SUBJECT: &str =
    "You have not tagged your post within the allotted amount of time.";

const REMOVAL_TEMPLATE: &str = "[Your recent post]({post_url}) still does not have any flair and will remain removed, feel free to resubmit your post and remember to flair it once it is posted.*";

pub const TECH_SUPPORT_SUBJECT: &str = "Tech support removed";

pub const TECH_SUPPORT_BODY: &str = "Hello, I see you have a tech support problem. For the best chance at resolving your issue, please post it in our monthly tech support megathread, /r/AMDHelp, or /r/techsupport";

pub fn reminder_body(post_url: &str, removal_window: &str) -> String {
    REMINDER_TEMPLATE
        .replace("{post_url}", post_url)
        .replace("{removal_window}", removal_window)
}

pub fn removal_body(post_url: &str) -> String {
    REMOVAL_TEMPLATE.replace("{post_url}", post_url)
}

/// Render a duration the way it reads in the reminder, `H:MM:SS` with a
/// `N day(s),` prefix past 24 hours. 1200 seconds comes out as `0:20:00`.
pub fn human_window(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;
    let clock = format!("{}:{:02}:{:02}", hours, minutes, seconds);
    match days {
        0 => clock,
        1 => format!("1 day, {}", clock),
        n => format!("{} days, {}", n, clock),
    }
}
