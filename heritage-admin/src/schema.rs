// Mirrors migrations/; `sites.location` is a generated PostGIS column and is
// only reached through SQL fragments.

diesel::table! {
    roles (id) {
        id -> Int4,
        #[max_length = 50]
        name -> Varchar,
    }
}

diesel::table! {
    permissions (id) {
        id -> Int4,
        #[max_length = 50]
        name -> Varchar,
    }
}

diesel::table! {
    role_permissions (id) {
        id -> Int4,
        role_id -> Int4,
        permission_id -> Int4,
    }
}

diesel::table! {
    users (id) {
        id -> Int4,
        #[max_length = 120]
        email -> Varchar,
        #[max_length = 50]
        first_name -> Varchar,
        #[max_length = 50]
        last_name -> Nullable<Varchar>,
        #[max_length = 255]
        password_hash -> Nullable<Varchar>,
        active -> Bool,
        sys_admin -> Bool,
        deleted -> Bool,
        #[max_length = 255]
        avatar -> Nullable<Varchar>,
        role_id -> Nullable<Int4>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    refresh_tokens (id) {
        id -> Int4,
        user_id -> Int4,
        #[max_length = 64]
        token_hash -> Varchar,
        expires_at -> Timestamptz,
        revoked_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    categories (id) {
        id -> Int4,
        #[max_length = 120]
        name -> Varchar,
    }
}

diesel::table! {
    states (id) {
        id -> Int4,
        #[max_length = 50]
        name -> Varchar,
    }
}

diesel::table! {
    sites (id) {
        id -> Int4,
        #[max_length = 50]
        site_name -> Varchar,
        #[max_length = 50]
        short_desc -> Varchar,
        #[max_length = 120]
        full_desc -> Varchar,
        #[max_length = 50]
        city -> Varchar,
        #[max_length = 50]
        province -> Varchar,
        opening_year -> Int4,
        latitude -> Nullable<Float8>,
        longitude -> Nullable<Float8>,
        category_id -> Int4,
        state_id -> Int4,
        active -> Bool,
        deleted -> Bool,
        views -> Int4,
        registration -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    tags (id) {
        id -> Int4,
        #[max_length = 50]
        name -> Varchar,
        #[max_length = 60]
        slug -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    site_tags (id) {
        id -> Int4,
        site_id -> Int4,
        tag_id -> Int4,
    }
}

diesel::table! {
    site_images (id) {
        id -> Int4,
        site_id -> Int4,
        #[max_length = 500]
        public_url -> Varchar,
        #[max_length = 255]
        file_path -> Varchar,
        #[max_length = 120]
        title_alt -> Varchar,
        #[max_length = 255]
        description -> Nullable<Varchar>,
        order_index -> Int4,
        is_cover -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    audits (id) {
        id -> Int4,
        site_id -> Int4,
        user_id -> Int4,
        #[max_length = 20]
        action_type -> Varchar,
        description -> Text,
        details -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    reviews (id) {
        id -> Int4,
        site_id -> Int4,
        user_id -> Int4,
        rating -> Int4,
        content -> Text,
        #[max_length = 20]
        status -> Varchar,
        #[max_length = 200]
        rejection_reason -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    review_audits (id) {
        id -> Int4,
        review_id -> Nullable<Int4>,
        user_id -> Int4,
        #[max_length = 20]
        action_type -> Varchar,
        description -> Text,
        details -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    flags (id) {
        id -> Int4,
        #[max_length = 50]
        name -> Varchar,
        #[max_length = 255]
        description -> Varchar,
        is_enabled -> Bool,
        #[max_length = 100]
        message -> Nullable<Varchar>,
        user_id -> Nullable<Int4>,
        last_edit -> Timestamptz,
    }
}

diesel::table! {
    user_favorites (id) {
        id -> Int4,
        user_id -> Int4,
        site_id -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(role_permissions -> roles (role_id));
diesel::joinable!(role_permissions -> permissions (permission_id));
diesel::joinable!(users -> roles (role_id));
diesel::joinable!(refresh_tokens -> users (user_id));
diesel::joinable!(sites -> categories (category_id));
diesel::joinable!(sites -> states (state_id));
diesel::joinable!(site_tags -> sites (site_id));
diesel::joinable!(site_tags -> tags (tag_id));
diesel::joinable!(site_images -> sites (site_id));
diesel::joinable!(audits -> sites (site_id));
diesel::joinable!(audits -> users (user_id));
diesel::joinable!(reviews -> sites (site_id));
diesel::joinable!(reviews -> users (user_id));
diesel::joinable!(review_audits -> users (user_id));
diesel::joinable!(user_favorites -> sites (site_id));
diesel::joinable!(user_favorites -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    roles,
    permissions,
    role_permissions,
    users,
    refresh_tokens,
    categories,
    states,
    sites,
    tags,
    site_tags,
    site_images,
    audits,
    reviews,
    review_audits,
    flags,
    user_favorites,
);
