//! Dumb view layer: each page is a plain struct rendered to an HTML
//! string. No templating engine, no logic beyond iteration.

pub struct IndexPage {
    pub logged_in: bool,
    pub uploads: Vec<String>,
}

pub struct SignupPage;

pub struct LoginPage;

impl IndexPage {
    pub fn render(&self) -> String {
        let mut body = String::from("<h1>picstash</h1>\n");

        if self.logged_in {
            body.push_str(
                "<form method=\"post\" enctype=\"multipart/form-data\" action=\"/\">\n\
                 <input type=\"file\" name=\"newfile\">\n\
                 <input type=\"submit\" value=\"upload\">\n\
                 </form>\n\
                 <p><a href=\"/logout\">log out</a></p>\n",
            );
        } else {
            body.push_str(
                "<p><a href=\"/login\">log in</a> or <a href=\"/register\">register</a> to upload</p>\n",
            );
        }

        body.push_str("<ul>\n");
        for name in &self.uploads {
            // names are hex digests plus a vetted extension, safe to embed
            body.push_str(&format!(
                "<li><img src=\"/public/pics/{name}\" alt=\"{name}\" width=\"200\"></li>\n"
            ));
        }
        body.push_str("</ul>\n");

        page("picstash", &body)
    }
}

impl SignupPage {
    pub fn render(&self) -> String {
        page(
            "register",
            "<h1>register</h1>\n\
             <form method=\"post\" action=\"/register\">\n\
             <input type=\"text\" name=\"username\" placeholder=\"username\">\n\
             <input type=\"password\" name=\"password\" placeholder=\"password\">\n\
             <input type=\"text\" name=\"firstname\" placeholder=\"first name\">\n\
             <input type=\"text\" name=\"lastname\" placeholder=\"last name\">\n\
             <input type=\"submit\" value=\"register\">\n\
             </form>\n",
        )
    }
}

impl LoginPage {
    pub fn render(&self) -> String {
        page(
            "login",
            "<h1>login</h1>\n\
             <form method=\"post\" action=\"/login\">\n\
             <input type=\"text\" name=\"username\" placeholder=\"username\">\n\
             <input type=\"password\" name=\"password\" placeholder=\"password\">\n\
             <input type=\"submit\" value=\"login\">\n\
             </form>\n\
             <p><a href=\"/register\">register instead</a></p>\n",
        )
    }
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body>\n{body}</body>\n</html>\n"
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_shows_upload_form_only_when_logged_in() {
        let logged_out = IndexPage {
            logged_in: false,
            uploads: vec![],
        }
        .render();
        assert!(!logged_out.contains("newfile"));
        assert!(logged_out.contains("/login"));

        let logged_in = IndexPage {
            logged_in: true,
            uploads: vec![],
        }
        .render();
        assert!(logged_in.contains("newfile"));
        assert!(logged_in.contains("/logout"));
    }

    #[test]
    fn index_lists_uploads() {
        let html = IndexPage {
            logged_in: false,
            uploads: vec!["abc123.jpg".into()],
        }
        .render();

        assert!(html.contains("/public/pics/abc123.jpg"));
    }
}
