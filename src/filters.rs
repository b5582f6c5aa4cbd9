use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use bytes::BufMut;
use futures_util::TryStreamExt;
use log::error;
use warp::http::{header, StatusCode, Uri};
use warp::multipart::FormData;
use warp::{Filter, Rejection, Reply};

use crate::auth::{self, SessionId, SESSION_COOKIE};
use crate::picstash::{Error, LoginForm, PicStash, RegisterForm};
use crate::session::SESSION_LIFE_SECS;
use crate::view::{IndexPage, LoginPage, SignupPage};

/// Cap on multipart bodies; uploads are buffered in memory.
const MAX_UPLOAD_BYTES: u64 = 32 * 1024 * 1024;

const MAX_FORM_BYTES: u64 = 16 * 1024;

/// The full application: routes, rejection recovery and request logging.
pub fn app(
    picstash: Arc<PicStash>,
    secure: bool,
    public_dir: PathBuf,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    routes(picstash, secure, public_dir)
        .recover(handle_rejection)
        .with(warp::log("picstash"))
}

fn routes(
    picstash: Arc<PicStash>,
    secure: bool,
    public_dir: PathBuf,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .and(with_app(&picstash))
        .and(session())
        .and_then(index_page);

    let upload = warp::path::end()
        .and(warp::post())
        .and(with_app(&picstash))
        .and(session())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and_then(upload_file);

    let register_page = warp::path!("register")
        .and(warp::get())
        .and(with_app(&picstash))
        .and(session())
        .and_then(register_form);

    let register = warp::path!("register")
        .and(warp::post())
        .and(with_app(&picstash))
        .and(session())
        .and(form_body())
        .and(with_secure(secure))
        .and_then(register_user);

    let login_page = warp::path!("login")
        .and(warp::get())
        .and(with_app(&picstash))
        .and(session())
        .and_then(login_form);

    let login = warp::path!("login")
        .and(warp::post())
        .and(with_app(&picstash))
        .and(session())
        .and(form_body())
        .and(with_secure(secure))
        .and_then(login_user);

    // any method
    let logout = warp::path!("logout")
        .and(with_app(&picstash))
        .and(session())
        .and(with_secure(secure))
        .and_then(logout_user);

    let statics = warp::path("public").and(warp::fs::dir(public_dir));

    index
        .or(upload)
        .or(register_page)
        .or(register)
        .or(login_page)
        .or(login)
        .or(logout)
        .or(statics)
}

fn with_app(
    picstash: &Arc<PicStash>,
) -> impl Filter<Extract = (Arc<PicStash>,), Error = Infallible> + Clone {
    let picstash = Arc::clone(picstash);
    warp::any().map(move || Arc::clone(&picstash))
}

fn with_secure(secure: bool) -> impl Filter<Extract = (bool,), Error = Infallible> + Clone {
    warp::any().map(move || secure)
}

/// The session cookie, if present and shaped like a token. A garbage
/// cookie is the same as no cookie.
fn session() -> impl Filter<Extract = (Option<SessionId>,), Error = Infallible> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE)
        .map(|value: Option<String>| value.and_then(|s| SessionId::from_str(&s).ok()))
}

fn form_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_FORM_BYTES).and(warp::body::form())
}

async fn index_page(
    picstash: Arc<PicStash>,
    session: Option<SessionId>,
) -> Result<warp::reply::Response, Rejection> {
    let logged_in = picstash.authenticate(session).await.is_some();
    render_index(&picstash, logged_in).await
}

async fn upload_file(
    picstash: Arc<PicStash>,
    session: Option<SessionId>,
    form: FormData,
) -> Result<warp::reply::Response, Rejection> {
    let logged_in = picstash.authenticate(session).await.is_some();

    // the upload form is ignored unless the request is authenticated
    if logged_in {
        if let Some((filename, bytes)) = read_newfile(form).await? {
            picstash
                .store_upload(&bytes, &filename)
                .await
                .map_err(warp::reject::custom)?;
        }
    }

    render_index(&picstash, logged_in).await
}

async fn render_index(
    picstash: &PicStash,
    logged_in: bool,
) -> Result<warp::reply::Response, Rejection> {
    let uploads = picstash.uploads().await.map_err(warp::reject::custom)?;

    let page = IndexPage { logged_in, uploads };
    Ok(warp::reply::html(page.render()).into_response())
}

/// Pull the `newfile` part out of the form, buffering its bytes. `None`
/// when the field is absent or empty (no file picked in the browser).
/// Each part's body must be drained while the form is being iterated;
/// the parts all share the one underlying reader.
async fn read_newfile(mut form: FormData) -> Result<Option<(String, Vec<u8>)>, Rejection> {
    while let Some(part) = form.try_next().await.map_err(|e| {
        error!("multipart form error: {e}");
        warp::reject::custom(Error::BadRequest)
    })? {
        if part.name() != "newfile" {
            continue;
        }

        let Some(filename) = part.filename().map(str::to_string) else {
            continue;
        };
        if filename.is_empty() {
            continue;
        }

        let bytes = part
            .stream()
            .try_fold(Vec::new(), |mut acc, data| {
                acc.put(data);
                async move { Ok(acc) }
            })
            .await
            .map_err(|e| {
                error!("reading multipart part: {e}");
                warp::reject::custom(Error::BadRequest)
            })?;

        return Ok(Some((filename, bytes)));
    }

    Ok(None)
}

async fn register_form(
    picstash: Arc<PicStash>,
    session: Option<SessionId>,
) -> Result<warp::reply::Response, Rejection> {
    if picstash.authenticate(session).await.is_some() {
        return Ok(see_other("/"));
    }

    Ok(warp::reply::html(SignupPage.render()).into_response())
}

async fn register_user(
    picstash: Arc<PicStash>,
    session: Option<SessionId>,
    form: RegisterForm,
    secure: bool,
) -> Result<warp::reply::Response, Rejection> {
    if picstash.authenticate(session).await.is_some() {
        return Ok(see_other("/"));
    }

    let id = picstash.register(&form).await.map_err(warp::reject::custom)?;

    // no Max-Age here: registration gets a browser-session cookie
    let cookie = auth::session_cookie(&id, None, secure);
    Ok(with_set_cookie(see_other("/"), &cookie))
}

async fn login_form(
    picstash: Arc<PicStash>,
    session: Option<SessionId>,
) -> Result<warp::reply::Response, Rejection> {
    if picstash.authenticate(session).await.is_some() {
        return Ok(see_other("/"));
    }

    Ok(warp::reply::html(LoginPage.render()).into_response())
}

async fn login_user(
    picstash: Arc<PicStash>,
    session: Option<SessionId>,
    form: LoginForm,
    secure: bool,
) -> Result<warp::reply::Response, Rejection> {
    if picstash.authenticate(session).await.is_some() {
        return Ok(see_other("/"));
    }

    let id = picstash.login(&form).await.map_err(warp::reject::custom)?;

    let max_age = ::time::Duration::seconds(SESSION_LIFE_SECS);
    let cookie = auth::session_cookie(&id, Some(max_age), secure);
    Ok(with_set_cookie(see_other("/"), &cookie))
}

async fn logout_user(
    picstash: Arc<PicStash>,
    session: Option<SessionId>,
    secure: bool,
) -> Result<warp::reply::Response, Rejection> {
    if picstash.authenticate(session).await.is_none() {
        return Ok(see_other("/"));
    }

    picstash.logout(session).await;

    Ok(with_set_cookie(
        see_other("/login"),
        &auth::clear_session_cookie(secure),
    ))
}

fn see_other(path: &'static str) -> warp::reply::Response {
    warp::redirect::see_other(Uri::from_static(path)).into_response()
}

fn with_set_cookie(
    response: warp::reply::Response,
    cookie: &cookie::Cookie<'static>,
) -> warp::reply::Response {
    warp::reply::with_header(response, header::SET_COOKIE, cookie.to_string()).into_response()
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found")
    } else if let Some(e) = err.find::<Error>() {
        (StatusCode::from(*e), e.message())
    } else if err
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        (StatusCode::BAD_REQUEST, "bad request")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "upload too large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "length required")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        error!("unhandled rejection: {err:?}");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(warp::reply::with_status(message, status))
}

#[cfg(test)]
mod test {
    use super::*;

    use tempfile::TempDir;

    use crate::session::SessionStore;
    use crate::uploads::UploadStore;
    use crate::users::UserStore;

    const SHA1_XYZ_JPG: &str = "717c4ecc723910edc13dd2491b0fae91442619da.jpg";

    fn test_app() -> (
        TempDir,
        Arc<PicStash>,
        impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone,
    ) {
        let tmp = tempfile::tempdir().unwrap();
        let public = tmp.path().join("public");

        let uploads = UploadStore::new(public.join("pics")).unwrap();
        let picstash = Arc::new(PicStash::new(
            UserStore::new(),
            SessionStore::new(),
            uploads,
        ));

        let filter = app(Arc::clone(&picstash), false, public);
        (tmp, picstash, filter)
    }

    async fn seed_alice(picstash: &Arc<PicStash>) -> SessionId {
        picstash
            .register(&RegisterForm {
                username: "alice".into(),
                password: "pw1".into(),
                firstname: "Alice".into(),
                lastname: "Anderson".into(),
            })
            .await
            .unwrap()
    }

    fn multipart_body(boundary: &str, filename: &str, content: &str) -> String {
        format!(
            "--{boundary}\r\n\
             content-disposition: form-data; name=\"newfile\"; filename=\"{filename}\"\r\n\
             content-type: application/octet-stream\r\n\
             \r\n\
             {content}\r\n\
             --{boundary}--\r\n"
        )
    }

    #[tokio::test]
    async fn register_sets_cookie_and_redirects() {
        let (_tmp, _ps, filter) = test_app();

        let res = warp::test::request()
            .method("POST")
            .path("/register")
            .header("content-type", "application/x-www-form-urlencoded")
            .body("username=alice&password=pw1&firstname=Alice&lastname=Anderson")
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/");

        let cookie = res.headers().get(header::SET_COOKIE).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("session="), "{cookie}");
        assert!(!cookie.contains("Max-Age"), "{cookie}");
    }

    #[tokio::test]
    async fn duplicate_registration_is_403() {
        let (_tmp, picstash, filter) = test_app();
        seed_alice(&picstash).await;

        let res = warp::test::request()
            .method("POST")
            .path("/register")
            .header("content-type", "application/x-www-form-urlencoded")
            .body("username=alice&password=other&firstname=Al&lastname=A")
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(res.body(), "username already taken");
    }

    #[tokio::test]
    async fn login_sets_cookie_with_max_age() {
        let (_tmp, picstash, filter) = test_app();
        seed_alice(&picstash).await;

        let res = warp::test::request()
            .method("POST")
            .path("/login")
            .header("content-type", "application/x-www-form-urlencoded")
            .body("username=alice&password=pw1")
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/");

        let cookie = res.headers().get(header::SET_COOKIE).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("session="), "{cookie}");
        assert!(cookie.contains("Max-Age=60"), "{cookie}");
    }

    #[tokio::test]
    async fn failed_login_is_403_with_no_cookie() {
        let (_tmp, picstash, filter) = test_app();
        seed_alice(&picstash).await;

        for body in ["username=alice&password=wrong", "username=eve&password=pw1"] {
            let res = warp::test::request()
                .method("POST")
                .path("/login")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(body)
                .reply(&filter)
                .await;

            assert_eq!(res.status(), StatusCode::FORBIDDEN);
            assert_eq!(res.body(), "Username and/or password do not match.");
            assert!(res.headers().get(header::SET_COOKIE).is_none());
        }
    }

    #[tokio::test]
    async fn register_redirects_when_already_logged_in() {
        let (_tmp, picstash, filter) = test_app();
        let id = seed_alice(&picstash).await;

        for path in ["/register", "/login"] {
            let res = warp::test::request()
                .method("GET")
                .path(path)
                .header("cookie", format!("session={id}"))
                .reply(&filter)
                .await;

            assert_eq!(res.status(), StatusCode::SEE_OTHER);
            assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/");
        }
    }

    #[tokio::test]
    async fn authenticated_upload_appears_in_listing() {
        let (tmp, picstash, filter) = test_app();
        let id = seed_alice(&picstash).await;

        let res = warp::test::request()
            .method("POST")
            .path("/")
            .header("cookie", format!("session={id}"))
            .header(
                "content-type",
                "multipart/form-data; boundary=boundary123",
            )
            .body(multipart_body("boundary123", "cat.jpg", "XYZ"))
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let page = std::str::from_utf8(res.body()).unwrap();
        assert!(page.contains(SHA1_XYZ_JPG), "{page}");

        assert!(tmp.path().join("public/pics").join(SHA1_XYZ_JPG).exists());
    }

    #[tokio::test]
    async fn upload_skips_unrelated_form_fields() {
        let (tmp, picstash, filter) = test_app();
        let id = seed_alice(&picstash).await;

        // an extra field ahead of newfile must be stepped over, not
        // tangle up the parts that follow it
        let body = "--boundary123\r\n\
             content-disposition: form-data; name=\"comment\"\r\n\
             \r\n\
             a nice cat\r\n\
             --boundary123\r\n\
             content-disposition: form-data; name=\"newfile\"; filename=\"cat.jpg\"\r\n\
             content-type: application/octet-stream\r\n\
             \r\n\
             XYZ\r\n\
             --boundary123--\r\n";

        let res = warp::test::request()
            .method("POST")
            .path("/")
            .header("cookie", format!("session={id}"))
            .header(
                "content-type",
                "multipart/form-data; boundary=boundary123",
            )
            .body(body)
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let page = std::str::from_utf8(res.body()).unwrap();
        assert!(page.contains(SHA1_XYZ_JPG), "{page}");
        assert!(tmp.path().join("public/pics").join(SHA1_XYZ_JPG).exists());
    }

    #[tokio::test]
    async fn unauthenticated_upload_is_ignored() {
        let (tmp, _ps, filter) = test_app();

        let res = warp::test::request()
            .method("POST")
            .path("/")
            .header(
                "content-type",
                "multipart/form-data; boundary=boundary123",
            )
            .body(multipart_body("boundary123", "cat.jpg", "XYZ"))
            .reply(&filter)
            .await;

        // page renders, but nothing was stored
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!tmp.path().join("public/pics").join(SHA1_XYZ_JPG).exists());
    }

    #[tokio::test]
    async fn upload_without_extension_is_400() {
        let (_tmp, picstash, filter) = test_app();
        let id = seed_alice(&picstash).await;

        let res = warp::test::request()
            .method("POST")
            .path("/")
            .header("cookie", format!("session={id}"))
            .header(
                "content-type",
                "multipart/form-data; boundary=boundary123",
            )
            .body(multipart_body("boundary123", "no-extension", "XYZ"))
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn identical_uploads_collapse_to_one_file() {
        let (tmp, picstash, filter) = test_app();
        let id = seed_alice(&picstash).await;

        for filename in ["cat.jpg", "other-name.jpg"] {
            let res = warp::test::request()
                .method("POST")
                .path("/")
                .header("cookie", format!("session={id}"))
                .header(
                    "content-type",
                    "multipart/form-data; boundary=boundary123",
                )
                .body(multipart_body("boundary123", filename, "XYZ"))
                .reply(&filter)
                .await;
            assert_eq!(res.status(), StatusCode::OK);
        }

        let stored: Vec<_> = std::fs::read_dir(tmp.path().join("public/pics"))
            .unwrap()
            .collect();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn logout_clears_the_cookie() {
        let (_tmp, picstash, filter) = test_app();
        let id = seed_alice(&picstash).await;

        let res = warp::test::request()
            .method("POST")
            .path("/logout")
            .header("cookie", format!("session={id}"))
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/login");

        let cookie = res.headers().get(header::SET_COOKIE).unwrap();
        assert!(cookie.to_str().unwrap().contains("Max-Age=0"));

        // the old token no longer authenticates
        let res = warp::test::request()
            .method("GET")
            .path("/")
            .header("cookie", format!("session={id}"))
            .reply(&filter)
            .await;
        let page = std::str::from_utf8(res.body()).unwrap();
        assert!(!page.contains("newfile"), "{page}");
    }

    #[tokio::test]
    async fn logout_without_session_redirects_home() {
        let (_tmp, _ps, filter) = test_app();

        let res = warp::test::request()
            .method("GET")
            .path("/logout")
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/");
        assert!(res.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn index_shows_upload_form_only_when_authenticated() {
        let (_tmp, picstash, filter) = test_app();
        let id = seed_alice(&picstash).await;

        let res = warp::test::request().method("GET").path("/").reply(&filter).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!std::str::from_utf8(res.body()).unwrap().contains("newfile"));

        let res = warp::test::request()
            .method("GET")
            .path("/")
            .header("cookie", format!("session={id}"))
            .reply(&filter)
            .await;
        assert!(std::str::from_utf8(res.body()).unwrap().contains("newfile"));
    }

    #[tokio::test]
    async fn garbage_session_cookie_is_just_unauthenticated() {
        let (_tmp, _ps, filter) = test_app();

        let res = warp::test::request()
            .method("GET")
            .path("/")
            .header("cookie", "session=not-a-token")
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn static_files_are_served_under_public() {
        let (tmp, _ps, filter) = test_app();

        std::fs::write(tmp.path().join("public/style.css"), "body {}").unwrap();

        let res = warp::test::request()
            .method("GET")
            .path("/public/style.css")
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body(), "body {}");
    }
}
